use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderName, HeaderValue, Method, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use reposcan_analyzer::build_analyzer;
use reposcan_common::{
    ErrorResponse, RepoKey, ResultEnvelope, FRESHNESS_WINDOW_SECS, LONG_POLL_ITERATIONS,
    QUEUE_CAPACITY,
};
use reposcan_fetcher::{Fetcher, GithubFetcher};
use reposcan_store::{Clock, ResultRow, SqlStore, Store, StoreError, SystemClock};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod config;
use config::{LONG_POLL_SLEEP, QUEUE_OFFER_TIMEOUT};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub tx: mpsc::Sender<RepoKey>,
    pub clock: Arc<dyn Clock>,
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub address: SocketAddr,
    pub database_url: String,
    pub worker_count: usize,
}

pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    pub fn address(&self) -> SocketAddr {
        self.config.address
    }

    /// Create the application router with the given state.
    pub fn create_router(state: AppState) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST]);

        Router::new()
            .route("/results/github.com/:user/:repo", get(handle_results))
            .route("/queue/github.com/:user/:repo", post(handle_queue))
            .route("/healthz", get(handle_healthz))
            .layer(middleware::from_fn(security_headers))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(state)
    }

    /// Run the server against the real upstream GitHub tarball endpoint.
    pub async fn run(
        self,
        ready_tx: tokio::sync::oneshot::Sender<SocketAddr>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(GithubFetcher::default());
        self.run_with_fetcher(ready_tx, fetcher).await
    }

    /// Run the server, connecting the store and spawning the worker pool
    /// against a caller-supplied [`Fetcher`] — the seam integration and
    /// stress tests use to point the job pipeline at a mock upstream
    /// instead of the real GitHub API.
    pub async fn run_with_fetcher(
        self,
        ready_tx: tokio::sync::oneshot::Sender<SocketAddr>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let store: Arc<dyn Store> = Arc::new(SqlStore::connect(&self.config.database_url).await?);
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);

        let node_id = Arc::new(reposcan_worker::generate_node_id());
        let analyzer_factory: Arc<dyn Fn() -> Box<dyn reposcan_analyzer::Analyzer> + Send + Sync> =
            Arc::new(build_analyzer);

        let _worker_handles = reposcan_worker::spawn(
            self.config.worker_count,
            rx,
            store.clone(),
            fetcher,
            analyzer_factory,
            node_id,
        );

        let state = AppState { store, tx, clock: Arc::new(SystemClock) };
        let app = Self::create_router(state);
        let listener = tokio::net::TcpListener::bind(self.config.address).await?;
        let local_addr = listener.local_addr()?;
        ready_tx.send(local_addr).ok();
        axum::serve(listener, app).await?;
        Ok(())
    }
}

/// Attach the fixed set of security headers carried on every response.
async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static("content-security-policy"),
        HeaderValue::from_static("default-src 'self' cdnjs.cloudflare.com;"),
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("deny"),
    );
    headers.insert(
        HeaderName::from_static("x-xss-protection"),
        HeaderValue::from_static("1; mode=block"),
    );
    response
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

fn cache_control_value(max_age_secs: i64) -> HeaderValue {
    HeaderValue::from_str(&format!("max-age:{}", max_age_secs.max(0)))
        .expect("valid Cache-Control header value")
}

fn parse_repo_key(user: String, repo: String) -> Result<RepoKey, Response> {
    RepoKey::new(user, repo).map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

/// Offer `key` to the worker queue, bounded by [`QUEUE_OFFER_TIMEOUT`].
/// `Err` is either a send failure (workers gone, 500) or a full queue (503).
async fn offer(tx: &mpsc::Sender<RepoKey>, key: RepoKey) -> Result<(), StatusCode> {
    match timeout(QUEUE_OFFER_TIMEOUT, tx.send(key)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(StatusCode::INTERNAL_SERVER_ERROR),
        Err(_) => Err(StatusCode::SERVICE_UNAVAILABLE),
    }
}

fn render_row(row: &ResultRow, key: &RepoKey, now: i64) -> Response {
    if row.missing {
        return error_response(StatusCode::NOT_FOUND, format!("{key} not found upstream"));
    }

    let results: serde_json::Value = match serde_json::from_str(&row.results) {
        Ok(v) => v,
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("corrupt stored result: {e}"),
            )
        }
    };

    let time = Utc
        .timestamp_opt(row.timestamp, 0)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_default();
    let tag = row.etag.clone().unwrap_or_default();

    let envelope = ResultEnvelope { time, repo: key.canonical(), tag, results };
    let mut response = (StatusCode::OK, Json(envelope)).into_response();
    let max_age = row.timestamp + FRESHNESS_WINDOW_SECS - now;
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, cache_control_value(max_age));
    response
}

async fn handle_healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /queue/github.com/:user/:repo` — enqueue a scan, without waiting for
/// a result. `202` once accepted onto the queue, `503` if it is full.
pub async fn handle_queue(
    State(state): State<AppState>,
    Path((user, repo)): Path<(String, String)>,
) -> Response {
    let key = match parse_repo_key(user, repo) {
        Ok(k) => k,
        Err(r) => return r,
    };

    match offer(&state.tx, key).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(status) => error_response(status, "queue is full, try again later"),
    }
}

/// `GET /results/github.com/:user/:repo` — enqueue a scan if needed, then
/// long-poll for up to [`LONG_POLL_ITERATIONS`] seconds for a fresh result.
pub async fn handle_results(
    State(state): State<AppState>,
    Path((user, repo)): Path<(String, String)>,
) -> Response {
    let key = match parse_repo_key(user, repo) {
        Ok(k) => k,
        Err(r) => return r,
    };

    if let Err(status) = offer(&state.tx, key.clone()).await {
        return error_response(status, "queue is full, try again later");
    }

    let now = state.clock.unix_now_secs();
    let seen_timestamp = match state.store.fetch_results(&key).await {
        Ok(row) => {
            if row.is_fresh(now) {
                return render_row(&row, &key, now);
            }
            row.timestamp
        }
        Err(StoreError::NotFound(_)) => 0,
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    for _ in 0..LONG_POLL_ITERATIONS {
        tokio::time::sleep(LONG_POLL_SLEEP).await;
        match state.store.fetch_results(&key).await {
            Ok(row) if row.timestamp != seen_timestamp => {
                return render_row(&row, &key, state.clock.unix_now_secs())
            }
            Ok(_) => {}
            Err(StoreError::NotFound(_)) => {}
            Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }

    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        format!("timed out waiting for analysis of {key}"),
    )
}
