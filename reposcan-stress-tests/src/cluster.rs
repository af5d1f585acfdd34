use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use reposcan_fetcher::Fetcher;
use reposcan_server::{Server, ServerConfig};
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::time::timeout;

const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// A multi-node reposcan deployment backed by one shared SQLite database, the
/// way a real cluster would share a database server. Each node runs its own
/// HTTP listener and worker pool against the same upstream fetcher, so the
/// lock in `reposcan_store` is the only thing keeping two nodes from racing
/// to scan the same repository.
pub struct Cluster {
    pub node_addrs: Vec<SocketAddr>,
    // Kept alive so the database file survives until every node shuts down.
    _db_dir: TempDir,
}

impl Cluster {
    /// Spawn `node_count` in-process server nodes, each running `worker_count`
    /// workers, all sharing one database and `fetcher`.
    ///
    /// Returns `Err` if the shared database cannot be created or a node fails
    /// to report readiness within [`READY_TIMEOUT`].
    pub async fn spawn(
        node_count: usize,
        worker_count: usize,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, String> {
        let db_dir = TempDir::new().map_err(|e| format!("failed to create temp dir: {e}"))?;
        let db_path = db_dir.path().join("reposcan.sqlite3");
        let database_url = format!("sqlite://{}?mode=rwc", db_path.display());

        let mut node_addrs = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            let config = ServerConfig {
                address: "127.0.0.1:0".parse().unwrap(),
                database_url: database_url.clone(),
                worker_count,
            };
            let (ready_tx, ready_rx) = oneshot::channel();
            let server = Server::new(config);
            let node_fetcher = fetcher.clone();
            tokio::spawn(async move {
                if let Err(e) = server.run_with_fetcher(ready_tx, node_fetcher).await {
                    eprintln!("node exited: {e}");
                }
            });
            let addr = timeout(READY_TIMEOUT, ready_rx)
                .await
                .map_err(|_| "node did not become ready within timeout".to_string())?
                .map_err(|_| "node ready signal dropped".to_string())?;
            node_addrs.push(addr);
        }

        Ok(Cluster { node_addrs, _db_dir: db_dir })
    }
}
