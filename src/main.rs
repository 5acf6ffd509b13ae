//! hswarm-peer: a swarm peer responder
//!
//! Answers other swarm participants over QUIC. Each bidirectional stream
//! carries one control message and gets one response:
//! - `hello` is acknowledged with `{"type":"ok"}`
//! - `request_chunk` is answered with raw chunk bytes
//! - anything else gets a JSON error frame
//!
//! Configuration via CLI arguments, `PEER_*` environment variables or a TOML
//! file.

mod chunk;
mod config;
mod protocols;
mod server;
mod tls;

use config::Config;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = ?config.workers,
        "Starting hswarm-peer"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    if let Err(e) = runtime.block_on(server::run(config)) {
        error!(error = %e, "Peer failed to start");
        std::process::exit(1);
    }

    Ok(())
}
