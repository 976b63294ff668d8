//! relayprobe-relay binary entry point.
//!
//! Usage:
//! ```bash
//! relayprobe-relay                       # defaults + environment
//! relayprobe-relay --config relay.toml   # file, then environment
//! PORT=9000 STORAGE_ENABLED=false relayprobe-relay
//! ```

use anyhow::Context;
use relayprobe_relay::cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL};
use relayprobe_relay::config::{Config, CONFIG_ENV};
use relayprobe_relay::{http, storage, Relay};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = get_config_path();
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;

    let storage = storage::open(&config.storage)
        .await
        .context("Failed to open storage")?;
    let relay = Arc::new(Relay::new(config.clone(), storage));

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;
    let local = listener.local_addr().context("Failed to read local address")?;

    tracing::info!("relayprobe-relay v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Health check: http://{}/health", local);
    tracing::info!("WebSocket:    ws://{}/ws", local);
    tracing::info!("Max connections: {}", config.limits.max_connections);

    let cleanup = spawn_cleanup_task(relay.clone(), DEFAULT_CLEANUP_INTERVAL);

    http::serve(relay, listener, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    cleanup.abort();
    tracing::info!("Relay stopped");
    Ok(())
}

fn get_config_path() -> Option<PathBuf> {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .map(PathBuf::from)
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Received shutdown signal, closing listener");
}
