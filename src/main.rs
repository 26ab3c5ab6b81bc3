//! Station Relay
//!
//! Serves named stations as long-lived HTTP audio streams. Each station's
//! real source is a short-lived media URL obtained from a live-video
//! platform with yt-dlp; the server keeps those URLs fresh in the
//! background and transcodes them to MP3 with ffmpeg per client.

mod cache;
mod config;
mod config_file;
mod error;
mod http;
#[cfg(test)]
mod integration;
mod refresh;
mod registry;
mod relay;
mod resolver;
mod scheduler;
mod state;
mod transcoder;

use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LoggingConfig, ServerConfig};
use crate::config_file::{config_path, generate_default_config, ConfigFile};
use crate::error::{RelayError, Result};
use crate::http::create_router;
use crate::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
const APP_NAME: &str = "station-relay";

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let first = args.next();

    if first.as_deref() == Some("--generate-config") {
        let path = args.next().unwrap_or_else(|| "config.toml".to_string());
        generate_default_config(&path)
            .map_err(|e| RelayError::Config(format!("failed to write {}: {}", path, e)))?;
        println!("Wrote default configuration to {}", path);
        return Ok(());
    }

    let config = load_config(first);

    init_logging(&config.logging);
    tracing::info!("{} v{} starting", APP_NAME, VERSION);
    tracing::info!("Configuration loaded: {:?}", config);

    config.validate()?;

    // Create application state
    let state = Arc::new(AppState::from_config(config.clone())?);
    if state.registry.is_empty() {
        tracing::warn!("No stations configured; every stream request will return 404");
    }
    for station in state.registry.iter() {
        tracing::info!("Station {} -> {}", station.name, station.locator);
    }

    let scheduler = state.start_scheduler();

    // Build router
    let app = create_router(state.clone());

    // Start server
    let addr: SocketAddr = config
        .socket_addr()
        .parse()
        .map_err(|e| RelayError::Config(format!("invalid listen address: {}", e)))?;
    tracing::info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    tracing::info!("{} stopped", APP_NAME);

    Ok(())
}

/// Read the config file, falling back to defaults when it is missing or broken
///
/// Runs before logging is set up, so problems go to stderr.
fn load_config(arg: Option<String>) -> ServerConfig {
    let path = config_path(arg);
    if !path.exists() {
        eprintln!("Config file {} not found, using defaults", path.display());
        return ServerConfig::default();
    }

    match ConfigFile::from_file(&path) {
        Ok(cf) => cf.into_server_config(),
        Err(e) => {
            eprintln!(
                "Failed to load config file {}: {}. Using defaults.",
                path.display(),
                e
            );
            ServerConfig::default()
        }
    }
}

/// Initialize logging with tracing
fn init_logging(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("station_relay={},tower_http=info", logging.level).into()
    });

    if logging.is_json() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
