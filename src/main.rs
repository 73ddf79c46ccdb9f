//! NetPulse server - LAN discovery over HTTP
//!
//! Loads configuration, opens the device history database, loads the OUI
//! table and serves `GET /health` and `POST /scan/devices` until Ctrl+C or
//! SIGTERM.

mod api;

use anyhow::{Context, Result};
use clap::Parser;
use netpulse_core::{ScanCoordinator, config};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "netpulse-server")]
#[command(version)]
#[command(about = "LAN discovery service with device history")]
struct Args {
    /// Config file (default: ~/.config/netpulse/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file and NETPULSE_BIND
    #[arg(short, long)]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("netpulse_server={},netpulse_core={}", log_level, log_level).into()
            }),
        )
        .init();

    let loaded = config::load_config(args.config.as_deref());
    let mut settings = loaded.config;
    if let Some(bind) = args.bind {
        settings.server.bind = bind;
    }
    tracing::info!(
        "Starting NetPulse server v{} (config from {})",
        env!("CARGO_PKG_VERSION"),
        loaded.source
    );

    let coordinator = ScanCoordinator::from_config(&settings)
        .await
        .context("Failed to initialise scan coordinator")?;
    let coordinator = Arc::new(coordinator);
    let app = api::router(coordinator.clone());

    let listener = tokio::net::TcpListener::bind(&settings.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind))?;
    tracing::info!("Listening on {}", settings.server.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    coordinator.store().close().await;
    tracing::info!("NetPulse server stopped");
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
