use std::time::Duration;

/// Upper bound on how long the HTTP facade waits to offer a key to the worker queue.
pub const QUEUE_OFFER_TIMEOUT: Duration = Duration::from_millis(reposcan_common::QUEUE_OFFER_TIMEOUT_MS);

/// Sleep between long-poll iterations on the read path.
pub const LONG_POLL_SLEEP: Duration = Duration::from_secs(1);
