//! orcd - Open Rooms Chat daemon.
//!
//! A single-process chat broker speaking JSON over HTTP and WebSocket.

use orcd::config::Config;
use orcd::ops::Orchestrator;
use orcd::state::{spawn_ticket_sweeper, Core};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; LOG_LEVEL wins over RUST_LOG.
    let filter = std::env::var("LOG_LEVEL")
        .map(EnvFilter::new)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    orcd::metrics::register_metrics();

    // Load configuration: optional TOML path as first argument, env on top.
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).map_err(|e| {
            error!(path = %path, error = %e, "failed to load config");
            e
        })?,
        None => Config::from_env()?,
    };

    info!(port = config.server.port, "starting orcd");

    let core = Arc::new(Core::new(config));
    spawn_ticket_sweeper(Arc::clone(&core));

    let port = core.config.server.port;
    let ops = Arc::new(Orchestrator::new(core));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    orcd::http::serve(ops, listener).await?;

    Ok(())
}
