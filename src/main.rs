// src/main.rs
// tunnelgate - password-gated static file and tunnel-upgrade server

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tunnelgate::config::{Args, ServerConfig};
use tunnelgate::session::{MemorySessionStore, SWEEP_INTERVAL, spawn_session_sweeper};
use tunnelgate::tunnel::{Tunnel, UnavailableTunnel, UpstreamTunnel};
use tunnelgate::{AppState, gateway, server};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from current directory
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::try_from(args)?;

    for root in config.missing_roots() {
        warn!("static root {} does not exist", root.display());
    }

    let tunnel: Arc<dyn Tunnel> = match &config.wisp_upstream {
        Some(url) => {
            info!("Tunnel upgrades relayed to {}", url);
            Arc::new(UpstreamTunnel::new(url.clone()))
        }
        None => {
            warn!("No WISP_UPSTREAM configured - tunnel upgrades will be closed");
            Arc::new(UnavailableTunnel)
        }
    };

    let sessions = Arc::new(MemorySessionStore::new(config.session_ttl));
    let sweeper = spawn_session_sweeper(sessions.clone(), SWEEP_INTERVAL);

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), sessions);
    let service = gateway(state, tunnel);

    // A failed bind ends the process with an error
    let listener = server::bind(&config).await?;
    server::log_reachable_addresses(listener.local_addr()?.port());

    server::run(listener, service, server::shutdown_signal()).await?;

    sweeper.abort();
    Ok(())
}
