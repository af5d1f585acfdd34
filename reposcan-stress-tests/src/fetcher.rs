use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reposcan_common::RepoKey;
use reposcan_fetcher::{FetchError, FetchOutcome, Fetcher};

/// Simulated upstream for load-testing. Every key maps to a stable tarball, so
/// any scanned result that changes across repeated fetches of the same key is
/// a correctness bug in the pipeline, not an expected upstream change.
pub struct StressFetcher {
    latency: Duration,
    calls: Mutex<HashMap<String, u64>>,
}

impl StressFetcher {
    pub fn new(latency: Duration) -> Self {
        Self { latency, calls: Mutex::new(HashMap::new()) }
    }

    pub fn call_count(&self, key: &RepoKey) -> u64 {
        *self.calls.lock().unwrap().get(&key.canonical()).unwrap_or(&0)
    }

    fn tarball_for(key: &RepoKey) -> Vec<u8> {
        let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let contents = format!("package main\n// marker for {}\n", key.canonical());
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        let entry_name = format!("{}-{}-deadbeef/main.go", key.user(), key.repo());
        builder.append_data(&mut header, entry_name, contents.as_bytes()).unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }
}

#[async_trait]
impl Fetcher for StressFetcher {
    async fn fetch(&self, key: &RepoKey, _known_etag: Option<&str>) -> Result<FetchOutcome, FetchError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let canonical = key.canonical();
        *self.calls.lock().unwrap().entry(canonical.clone()).or_insert(0) += 1;
        Ok(FetchOutcome::Fetched {
            body: Self::tarball_for(key),
            etag: Some(format!("\"{canonical}\"")),
        })
    }
}
