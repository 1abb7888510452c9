//! framelink: demo peer for the framing engine
//!
//! Two modes:
//! - `--listen ADDR`: accept TCP peers and echo their text packets
//! - `--connect ADDR`: handshake with a peer and send stdin lines
//!
//! Configuration via CLI arguments or TOML file.

mod config;
mod peer;

use config::Config;
use tracing::info;
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
        mode = ?config.mode,
        deferred = config.deferred,
        protocol_version = config.connection.protocol_version,
        keep_alive = config.connection.auto_keep_alive,
        idle_timeout_ms = config.connection.idle_timeout.as_millis() as u64,
        "Starting framelink peer"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(peer::run(config))
}
