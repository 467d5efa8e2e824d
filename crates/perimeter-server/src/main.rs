//! # perimeter-server
//!
//! HTTP host for the perimeter access-control engine.
//!
//! This binary provides:
//! - REST API for sensor events, rules, location fixes and blocking decisions
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package perimeter-server
//!
//! # Production
//! PERIMETER_ENV=production ./perimeter-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use perimeter_core::{EngineConfig, SystemClock};
use perimeter_server::inventory::{BeaconInventory, INVENTORY_PATH_ENV};
use perimeter_server::{api, logging, state::AppState};
use tokio::net::TcpListener;
use tracing::info;

/// Environment variable overriding the config file location.
const CONFIG_PATH_ENV: &str = "PERIMETER_CONFIG";

/// Environment variable overriding the listen address.
const BIND_ENV: &str = "PERIMETER_BIND";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(&logging::LoggingOptions::from_env())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting perimeter-server");

    let config_path = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => PathBuf::from(path),
        Err(_) => EngineConfig::default_path()?,
    };
    let config = EngineConfig::load_or_default(&config_path)?;
    info!(path = %config_path.display(), strategy = %config.engine.strategy, "Loaded configuration");

    let inventory = match std::env::var(INVENTORY_PATH_ENV) {
        Ok(path) => BeaconInventory::load_or_empty(Path::new(&path))?,
        Err(_) => BeaconInventory::default(),
    };

    let (state, engine_task) =
        AppState::start_with_inventory(config, Arc::new(SystemClock), &inventory)?;
    let engine = state.engine().clone();
    let app = api::create_router(state);

    let addr: SocketAddr = std::env::var(BIND_ENV)
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.shutdown();
    engine_task.await?;
    info!("Engine stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
