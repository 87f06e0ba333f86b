//! Courier - channel-to-channel message relay
//!
//! A daemon that monitors channels on a source messaging server and mirrors
//! their messages into channels on a destination server, preserving author
//! identity, attachments, and edits, and catching up on missed messages
//! after an outage.

mod bridge;
mod client;
mod common;
mod config;
mod relay;
mod supervisor;

use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use bridge::Orchestrator;
use config::{env::get_config_path, load_and_validate};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Courier v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Source: {}", config.source.url);
    info!("  Destination: {}", config.destination.url);
    info!("  Channel routes: {}", config.channels.len());

    let orchestrator = Orchestrator::from_config(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut relay_task = tokio::spawn(async move { orchestrator.run(shutdown_rx).await });

    let shutdown = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - closing connections...");
            true
        }
        result = &mut relay_task => {
            result.map_err(|e| anyhow::anyhow!("relay task panicked: {}", e))??;
            false
        }
    };

    if shutdown {
        // Fire-and-forget; a closed channel means the relay already exited.
        let _ = shutdown_tx.send(true);
        match tokio::time::timeout(Duration::from_secs(10), relay_task).await {
            Ok(Ok(Ok(()))) => info!("Relay stopped gracefully"),
            Ok(Ok(Err(e))) => error!("Relay failed during shutdown: {:#}", e),
            Ok(Err(e)) => warn!("Relay task panicked: {}", e),
            Err(_) => warn!("Relay shutdown timed out"),
        }
    }

    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
