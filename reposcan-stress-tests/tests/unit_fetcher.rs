use std::time::Duration;

use reposcan_common::RepoKey;
use reposcan_fetcher::{FetchOutcome, Fetcher};
use reposcan_stress_tests::fetcher::StressFetcher;

#[tokio::test]
async fn fetch_is_stable_across_repeated_calls() {
    let fetcher = StressFetcher::new(Duration::from_millis(0));
    let key = RepoKey::new("acme", "widgets").unwrap();

    let first = fetcher.fetch(&key, None).await.unwrap();
    let second = fetcher.fetch(&key, None).await.unwrap();

    let (FetchOutcome::Fetched { body: b1, etag: e1 }, FetchOutcome::Fetched { body: b2, etag: e2 }) =
        (first, second)
    else {
        panic!("expected Fetched outcomes");
    };
    assert_eq!(b1, b2, "simulated upstream must serve stable content per key");
    assert_eq!(e1, e2);
}

#[tokio::test]
async fn call_count_tracks_fetches_per_key() {
    let fetcher = StressFetcher::new(Duration::from_millis(0));
    let key = RepoKey::new("acme", "widgets").unwrap();
    assert_eq!(fetcher.call_count(&key), 0);

    fetcher.fetch(&key, None).await.unwrap();
    fetcher.fetch(&key, None).await.unwrap();
    assert_eq!(fetcher.call_count(&key), 2);

    let other = RepoKey::new("acme", "other").unwrap();
    assert_eq!(fetcher.call_count(&other), 0);
}
