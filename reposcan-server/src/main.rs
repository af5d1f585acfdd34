use std::net::SocketAddr;

use reposcan_server::{Server, ServerConfig};

fn worker_count() -> usize {
    std::env::var("REPOSCAN_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| 2 * num_cpus::get())
}

fn port() -> u16 {
    std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let database_url = std::env::var("DATABASE_URL")?;
    let address: SocketAddr = ([0, 0, 0, 0], port()).into();

    let config = ServerConfig {
        address,
        database_url,
        worker_count: worker_count(),
    };

    let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();

    tokio::spawn(async move {
        if let Ok(addr) = ready_rx.await {
            tracing::info!(%addr, "listening");
        }
    });

    Server::new(config).run(ready_tx).await?;
    Ok(())
}
