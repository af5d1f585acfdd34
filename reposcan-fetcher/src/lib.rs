//! Conditional retrieval of upstream repository tarballs.

use async_trait::async_trait;
use reposcan_common::RepoKey;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient fetch error: {0}")]
    Transient(String),
}

/// Outcome of one [`Fetcher::fetch`] call.
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    /// Upstream reports the tarball is unchanged since `known_etag`.
    NotModified,
    /// Upstream repository does not exist (404).
    NotFound,
    /// A new tarball body, along with the `ETag` it was served with.
    Fetched { body: Vec<u8>, etag: Option<String> },
}

/// Conditional tarball retrieval keyed on a previously recorded `ETag`.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        key: &RepoKey,
        known_etag: Option<&str>,
    ) -> Result<FetchOutcome, FetchError>;
}

fn extract_etag(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Production [`Fetcher`] against the real GitHub tarball endpoint.
pub struct GithubFetcher {
    client: reqwest::Client,
}

impl GithubFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for GithubFetcher {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl Fetcher for GithubFetcher {
    async fn fetch(
        &self,
        key: &RepoKey,
        known_etag: Option<&str>,
    ) -> Result<FetchOutcome, FetchError> {
        let url = key.tarball_url();

        let mut head_req = self.client.head(&url);
        if let Some(tag) = known_etag {
            head_req = head_req.header(IF_NONE_MATCH, tag);
        }
        let head_resp = head_req
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("HEAD {url}: {e}")))?;

        match head_resp.status() {
            StatusCode::NOT_MODIFIED => return Ok(FetchOutcome::NotModified),
            StatusCode::NOT_FOUND => return Ok(FetchOutcome::NotFound),
            s if !s.is_success() => {
                return Err(FetchError::Transient(format!("HEAD {url} returned {s}")))
            }
            _ => {}
        }

        let head_etag = extract_etag(&head_resp);
        if let (Some(head_tag), Some(known)) = (head_etag.as_deref(), known_etag) {
            if head_tag == known {
                return Ok(FetchOutcome::NotModified);
            }
        }

        let mut get_req = self.client.get(&url);
        if let Some(tag) = known_etag {
            get_req = get_req.header(IF_NONE_MATCH, tag);
        }
        let get_resp = get_req
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("GET {url}: {e}")))?;

        match get_resp.status() {
            StatusCode::NOT_MODIFIED => Ok(FetchOutcome::NotModified),
            StatusCode::NOT_FOUND => Ok(FetchOutcome::NotFound),
            s if s.is_success() => {
                let etag = extract_etag(&get_resp);
                let body = get_resp
                    .bytes()
                    .await
                    .map_err(|e| FetchError::Transient(format!("GET {url} body: {e}")))?
                    .to_vec();
                Ok(FetchOutcome::Fetched { body, etag })
            }
            s => Err(FetchError::Transient(format!("GET {url} returned {s}"))),
        }
    }
}
