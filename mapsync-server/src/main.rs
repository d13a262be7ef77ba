//! Standalone realtime server.
//!
//! Configured from the environment (`MAPSYNC_BIND_ADDR`,
//! `MAPSYNC_SESSION_COOKIE`); log level via `RUST_LOG`.

use log::info;
use mapsync_collab::server::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from_env();
    info!(
        "Starting mapsync realtime server on {} (cookie {})",
        config.bind_addr, config.session_cookie
    );
    let server = SyncServer::new(config);

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Shutting down: {} connections served, {} active",
                stats.total_connections, stats.active_connections
            );
        }
    }

    Ok(())
}
