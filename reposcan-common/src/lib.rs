use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Maximum number of tar entries examined per analysis job.
pub const ARCHIVE_FILE_LIMIT: usize = 5000;

/// Seconds after which a stored result is considered stale.
pub const FRESHNESS_WINDOW_SECS: i64 = 3600;

/// Seconds a distributed lock is held before it is eligible for takeover.
pub const LOCK_LIFETIME_SECS: i64 = 300;

/// Minimum wall-clock interval between lock refreshes during a job.
pub const LOCK_REFRESH_INTERVAL_SECS: u64 = 60;

/// Capacity of the in-process bounded queue between the HTTP facade and the worker pool.
pub const QUEUE_CAPACITY: usize = 10;

/// Maximum time the HTTP facade waits when offering a job to the queue.
pub const QUEUE_OFFER_TIMEOUT_MS: u64 = 100;

/// Number of 1-second long-poll iterations before the read path gives up.
pub const LONG_POLL_ITERATIONS: u32 = 20;

/// Characters permitted in the `user` and `repo` path segments.
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Canonical `github.com/<user>/<repo>` identifier.
///
/// All persistent rows are keyed by the SHA-256 of [`RepoKey::canonical`]; the
/// human-readable form is retained alongside for logging and response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoKey {
    user: String,
    repo: String,
}

impl RepoKey {
    /// Build a `RepoKey` from its `user` and `repo` path segments, validating
    /// both against `[A-Za-z0-9_.-]+`.
    pub fn new(user: impl Into<String>, repo: impl Into<String>) -> Result<Self, RepoScanError> {
        let user = user.into();
        let repo = repo.into();
        if !is_valid_segment(&user) || !is_valid_segment(&repo) {
            return Err(RepoScanError::InvalidRepoKey(format!(
                "github.com/{user}/{repo}"
            )));
        }
        Ok(Self { user, repo })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// The canonical `github.com/<user>/<repo>` string.
    pub fn canonical(&self) -> String {
        format!("github.com/{}/{}", self.user, self.repo)
    }

    /// The upstream tarball URL for this repository.
    pub fn tarball_url(&self) -> String {
        format!(
            "https://api.github.com/repos/{}/{}/tarball",
            self.user, self.repo
        )
    }

    /// SHA-256 of [`Self::canonical`], used as the primary key in storage.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical().as_bytes());
        hasher.finalize().into()
    }
}

impl std::fmt::Display for RepoKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

/// Severity assigned to an analyzer-reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A single finding produced by the analyzer façade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Repository-relative path (rewritten from the scratch-dir absolute path by the worker).
    pub file: String,
    pub line: u32,
    pub rule_id: String,
    pub severity: Severity,
    pub message: String,
}

/// The analyzer's accumulated, serializable state for one job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub issues: Vec<Issue>,
    pub files_scanned: u32,
}

/// Body of every non-2xx HTTP response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of a successful `GET /results/...` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub time: String,
    pub repo: String,
    pub tag: String,
    pub results: serde_json::Value,
}

/// Error taxonomy shared across the job pipeline.
///
/// Component crates define their own narrower error enums (`StoreError`,
/// `FetchError`, ...) and convert into this one at the boundaries that need
/// a single type — the HTTP facade and the worker's top-level job result.
#[derive(Debug, Error)]
pub enum RepoScanError {
    #[error("invalid repository identifier: {0}")]
    InvalidRepoKey(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("lock lost for {0}")]
    LostLock(String),

    #[error("internal error: {0}")]
    Internal(String),
}
