//! Drains the repo-key queue and runs the fetch → analyze → store pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use flate2::read::GzDecoder;
use reposcan_analyzer::Analyzer;
use reposcan_common::{AnalysisReport, RepoKey, ARCHIVE_FILE_LIMIT, LOCK_LIFETIME_SECS, LOCK_REFRESH_INTERVAL_SECS};
use reposcan_fetcher::{FetchOutcome, Fetcher};
use reposcan_store::{LockHandle, Store, StoreError};
use tar::Archive;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Per-process identifier shared by every worker task, used as the
/// distributed lock's `holder` value.
pub fn generate_node_id() -> String {
    Uuid::new_v4().to_string()
}

/// Outcome of a single dequeued job. Returned for observability and tests;
/// the HTTP facade never sees this directly.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    AlreadyFresh,
    LockHeldElsewhere,
    Missing,
    NotModified,
    FetchTransient,
    LostLock,
    Stored { issues: usize, files_scanned: u32 },
}

enum WalkError {
    LostLock,
    Io(String),
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn is_included(path: &Path) -> bool {
    let name = path.to_string_lossy();
    name.ends_with(".go")
        && !name.contains("vendor/")
        && !name.contains("testdata/")
        && !name.ends_with("_test.go")
}

/// Strip the scratch root and the archive's top-level wrapper directory from
/// every issue's `file` field. An archive with no wrapper directory (a
/// single-component relative path) is left unchanged, per the degrade-rather-
/// than-panic policy.
fn rewrite_paths(report: &mut AnalysisReport, scratch_root: &Path) {
    for issue in &mut report.issues {
        let path = Path::new(&issue.file);
        if let Ok(rel) = path.strip_prefix(scratch_root) {
            let mut components = rel.components();
            components.next();
            let rest: PathBuf = components.collect();
            issue.file = if rest.components().next().is_some() {
                rest.to_string_lossy().replace('\\', "/")
            } else {
                rel.to_string_lossy().replace('\\', "/")
            };
        }
    }
}

async fn walk_tar(
    body: &[u8],
    scratch_root: &Path,
    analyzer: &mut dyn Analyzer,
    lock: &mut LockHandle,
    refresh_interval: Duration,
) -> Result<(), WalkError> {
    let decoder = GzDecoder::new(body);
    let mut archive = Archive::new(decoder);
    let entries = archive.entries().map_err(|e| WalkError::Io(e.to_string()))?;

    let mut last_refresh = Instant::now();
    let mut processed = 0usize;

    for entry in entries {
        if processed >= ARCHIVE_FILE_LIMIT {
            break;
        }
        let mut entry = entry.map_err(|e| WalkError::Io(e.to_string()))?;
        processed += 1;

        if last_refresh.elapsed() >= refresh_interval {
            lock.refresh().await.map_err(|_| WalkError::LostLock)?;
            last_refresh = Instant::now();
        }

        let entry_path = entry
            .path()
            .map_err(|e| WalkError::Io(e.to_string()))?
            .into_owned();
        let dest = scratch_root.join(&entry_path);

        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&dest).map_err(|e| WalkError::Io(e.to_string()))?;
            continue;
        }

        if !is_included(&entry_path) {
            continue;
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| WalkError::Io(e.to_string()))?;
        }
        entry
            .unpack(&dest)
            .map_err(|e| WalkError::Io(e.to_string()))?;

        if let Err(e) = analyzer.process(&dest) {
            tracing::warn!(path = %dest.display(), error = %e, "analyzer failed on file, skipping");
        }

        let _ = std::fs::remove_file(&dest);
    }

    Ok(())
}

async fn release(lock: LockHandle, node_id: &str, key: &RepoKey) {
    if let Err(e) = lock.unlock().await {
        tracing::error!(repo = %key, node_id, error = %e, "failed to release lock");
    }
}

/// Run one repo-analysis job to completion, never propagating an error to
/// the caller: every failure mode is logged and reduced to a [`JobOutcome`].
pub async fn run_job(
    node_id: &str,
    key: &RepoKey,
    store: &dyn Store,
    fetcher: &dyn Fetcher,
    mut analyzer: Box<dyn Analyzer>,
    refresh_interval: Duration,
) -> JobOutcome {
    let now = unix_now();

    let previous = match store.fetch_results(key).await {
        Ok(row) => {
            if row.is_fresh(now) {
                return JobOutcome::AlreadyFresh;
            }
            Some(row)
        }
        Err(StoreError::NotFound(_)) => None,
        Err(e) => {
            tracing::error!(repo = %key, node_id, phase = "read", error = %e, "store read failed");
            return JobOutcome::FetchTransient;
        }
    };

    let mut lock = match store.lock_path(node_id, key, LOCK_LIFETIME_SECS).await {
        Ok(Some(handle)) => handle,
        Ok(None) => return JobOutcome::LockHeldElsewhere,
        Err(e) => {
            tracing::error!(repo = %key, node_id, phase = "lock", error = %e, "lock acquisition failed");
            return JobOutcome::FetchTransient;
        }
    };

    let scratch = match tempfile::TempDir::new() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(repo = %key, node_id, phase = "scratch", error = %e, "failed to create scratch dir");
            release(lock, node_id, key).await;
            return JobOutcome::FetchTransient;
        }
    };

    let known_etag = previous.as_ref().and_then(|row| row.etag.clone());

    let (body, new_etag) = match fetcher.fetch(key, known_etag.as_deref()).await {
        Ok(FetchOutcome::NotFound) => {
            if let Err(e) = store.store_results(key, None, "", true).await {
                tracing::error!(repo = %key, node_id, phase = "store", error = %e, "failed to record missing repo");
            }
            release(lock, node_id, key).await;
            return JobOutcome::Missing;
        }
        Ok(FetchOutcome::NotModified) => {
            if let Err(e) = store.update_timestamp(key).await {
                tracing::error!(repo = %key, node_id, phase = "store", error = %e, "failed to bump timestamp");
            }
            release(lock, node_id, key).await;
            return JobOutcome::NotModified;
        }
        Ok(FetchOutcome::Fetched { body, etag }) => (body, etag),
        Err(e) => {
            tracing::error!(repo = %key, node_id, phase = "fetch", error = %e, "upstream fetch failed");
            release(lock, node_id, key).await;
            return JobOutcome::FetchTransient;
        }
    };

    let walk_result = walk_tar(&body, scratch.path(), analyzer.as_mut(), &mut lock, refresh_interval).await;

    if let Err(err) = walk_result {
        return match err {
            WalkError::LostLock => {
                tracing::error!(repo = %key, node_id, "lock lost mid-job, discarding partial results");
                JobOutcome::LostLock
            }
            WalkError::Io(msg) => {
                tracing::error!(repo = %key, node_id, error = %msg, "tar walk failed");
                release(lock, node_id, key).await;
                JobOutcome::FetchTransient
            }
        };
    }

    let mut report = analyzer.into_report();
    rewrite_paths(&mut report, scratch.path());

    let results_json = match serde_json::to_string(&report) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(repo = %key, node_id, error = %e, "failed to serialize analysis report");
            release(lock, node_id, key).await;
            return JobOutcome::FetchTransient;
        }
    };

    if let Err(e) = store
        .store_results(key, new_etag.as_deref(), &results_json, false)
        .await
    {
        tracing::error!(repo = %key, node_id, error = %e, "failed to store analysis results");
    }

    let outcome = JobOutcome::Stored {
        issues: report.issues.len(),
        files_scanned: report.files_scanned,
    };
    release(lock, node_id, key).await;
    outcome
}

/// Spawn `count` worker tasks sharing `rx`. Each job runs as its own spawned
/// task so a panic inside it is caught at the `JoinHandle` boundary and
/// logged instead of taking the worker loop down.
pub fn spawn(
    count: usize,
    rx: mpsc::Receiver<RepoKey>,
    store: Arc<dyn Store>,
    fetcher: Arc<dyn Fetcher>,
    analyzer_factory: Arc<dyn Fn() -> Box<dyn Analyzer> + Send + Sync>,
    node_id: Arc<String>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(rx));
    (0..count)
        .map(|_| {
            let rx = rx.clone();
            let store = store.clone();
            let fetcher = fetcher.clone();
            let analyzer_factory = analyzer_factory.clone();
            let node_id = node_id.clone();
            tokio::spawn(async move {
                loop {
                    let next = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    let key = match next {
                        Some(key) => key,
                        None => break,
                    };

                    let store = store.clone();
                    let fetcher = fetcher.clone();
                    let analyzer = (analyzer_factory)();
                    let node_id = node_id.clone();
                    let refresh_interval = Duration::from_secs(LOCK_REFRESH_INTERVAL_SECS);

                    let job = tokio::spawn(async move {
                        run_job(&node_id, &key, store.as_ref(), fetcher.as_ref(), analyzer, refresh_interval).await
                    });

                    match job.await {
                        Ok(outcome) => tracing::debug!(?outcome, "job finished"),
                        Err(panic) => tracing::error!(error = %panic, "worker job panicked"),
                    }
                }
            })
        })
        .collect()
}
