use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use reposcan_common::RepoKey;
use reposcan_server::{handle_healthz, handle_queue, handle_results, AppState};
use reposcan_store::{Clock, SqlStore, Store};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::mpsc;

const NOW: i64 = 1_700_000_000;

struct MockClock(AtomicI64);

impl MockClock {
    fn new(now: i64) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(now)))
    }
}

impl Clock for MockClock {
    fn unix_now_secs(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Build an `AppState` backed by a fresh in-memory store, plus the receiving
/// end of the queue channel so tests can drain or deliberately starve it.
async fn app_state() -> (AppState, mpsc::Receiver<RepoKey>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let clock = MockClock::new(NOW);
    let store = SqlStore::new(pool, clock.clone() as Arc<dyn Clock>);
    store.migrate().await.unwrap();

    let (tx, rx) = mpsc::channel(reposcan_common::QUEUE_CAPACITY);
    let state = AppState { store: Arc::new(store) as Arc<dyn Store>, tx, clock: clock as Arc<dyn Clock> };
    (state, rx)
}

async fn response_body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn handle_healthz_reports_ok() {
    let body = handle_healthz().await;
    assert_eq!(body.0, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn handle_queue_rejects_invalid_repo_path() {
    let (state, _rx) = app_state().await;
    let response = handle_queue(
        State(state),
        Path(("../evil".to_string(), "widgets".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn handle_queue_returns_accepted_when_queue_has_room() {
    let (state, mut rx) = app_state().await;
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let response = handle_queue(
        State(state),
        Path(("acme".to_string(), "widgets".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn handle_queue_returns_503_when_queue_is_full() {
    let (state, _rx) = app_state().await;
    // Saturate the channel without a receiver draining it.
    for i in 0..reposcan_common::QUEUE_CAPACITY {
        let key = RepoKey::new("acme", format!("filler{i}")).unwrap();
        state.tx.try_send(key).expect("channel should accept up to its capacity");
    }

    let response = handle_queue(
        State(state),
        Path(("acme".to_string(), "overflow".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn handle_results_returns_fresh_row_without_long_polling() {
    let (state, mut rx) = app_state().await;
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let key = RepoKey::new("acme", "cached").unwrap();
    state
        .store
        .store_results(&key, Some("\"v1\""), r#"{"issues":[],"files_scanned":2}"#, false)
        .await
        .unwrap();

    let response = handle_results(
        State(state),
        Path(("acme".to_string(), "cached".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = response_body_json(response).await;
    assert_eq!(body["tag"], "\"v1\"");
    assert_eq!(body["repo"], "github.com/acme/cached");
    assert_eq!(body["results"]["files_scanned"], 2);
}

#[tokio::test]
async fn handle_results_returns_404_for_a_cached_miss() {
    let (state, mut rx) = app_state().await;
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let key = RepoKey::new("acme", "ghost").unwrap();
    state.store.store_results(&key, None, "null", true).await.unwrap();

    let response = handle_results(
        State(state),
        Path(("acme".to_string(), "ghost".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn handle_results_rejects_invalid_repo_path() {
    let (state, _rx) = app_state().await;
    let response = handle_results(
        State(state),
        Path(("".to_string(), "widgets".to_string())),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
