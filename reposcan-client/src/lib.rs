use reposcan_common::{ErrorResponse, ResultEnvelope};
use thiserror::Error;

/// Client configuration: the `host:port` of the server to talk to.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("network error: {0}")]
    Network(String),

    #[error("repo not found: {0}")]
    NotFound(String),

    #[error("timed out waiting for analysis result")]
    TimedOut,

    #[error("server returned {0}: {1}")]
    Http(u16, String),
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Thin HTTP client over the repo-scan results/queue endpoints.
pub struct Client {
    pub config: ClientConfig,
    http_client: reqwest::Client,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self { config, http_client: reqwest::Client::new() }
    }

    fn results_url(&self, user: &str, repo: &str) -> String {
        format!("http://{}/results/github.com/{user}/{repo}", self.config.server_addr)
    }

    fn queue_url(&self, user: &str, repo: &str) -> String {
        format!("http://{}/queue/github.com/{user}/{repo}", self.config.server_addr)
    }

    /// Enqueue a scan without waiting for the result. `Ok` on `202 Accepted`.
    pub async fn queue(&self, user: &str, repo: &str) -> Result<()> {
        let url = self.queue_url(user, repo);
        let response = self
            .http_client
            .post(&url)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(parse_error_response(status, response).await)
        }
    }

    /// Long-poll for an analysis result, enqueueing a scan if one is not
    /// already fresh. `NotFound` means the upstream repository does not
    /// exist; `TimedOut` means no fresh result arrived within the server's
    /// long-poll window.
    pub async fn results(&self, user: &str, repo: &str) -> Result<ResultEnvelope> {
        let url = self.results_url(user, repo);
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(format!("github.com/{user}/{repo}")));
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ClientError::TimedOut);
        }
        if !status.is_success() {
            return Err(parse_error_response(status, response).await);
        }

        response
            .json::<ResultEnvelope>()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))
    }
}

async fn parse_error_response(status: reqwest::StatusCode, response: reqwest::Response) -> ClientError {
    let message = response
        .json::<ErrorResponse>()
        .await
        .map(|r| r.error)
        .unwrap_or_else(|_| format!("server returned status: {status}"));
    ClientError::Http(status.as_u16(), message)
}
