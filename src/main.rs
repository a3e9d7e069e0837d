//! Crash Game Server
//!
//! Authoritative multiplier and crash point for every connected player.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crash_game::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = std::sync::Arc::new(GameServer::new(ServerConfig::from_env()));
    let config = server.config();

    info!("Crash Server v{}", VERSION);
    info!("Tick interval: {:?}", config.tick_interval);
    match &config.allowed_origin {
        Some(origin) => info!("Allowed origin: {}", origin),
        None => info!("Allowed origin: any"),
    }

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            signal_server.shutdown();
        }
    });

    server.run().await.context("game server failed")?;
    Ok(())
}
