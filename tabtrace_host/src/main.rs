//! tabtrace host - capture engine behind the network inspector extension
//!
//! This process handles:
//! - Request lifecycle events from the browser's observation hooks
//! - Call batches from the in-page observer
//! - Tab lifecycle events (session start, replacement, end)
//! - The UI message contract, analytics and manual request actions
//! - A WebSocket feed of live session changes

mod actions;
mod analytics;
mod capture;
mod config;
mod dispatch;
mod error;
mod persistence;
mod reconciler;
mod routes;
mod store;
mod tabs;

use anyhow::Context;
use persistence::{FileStore, KvStore, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tabtrace_host=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Starting tabtrace host on {}", config.bind_addr());

    let store: Arc<dyn KvStore> = if config.ephemeral {
        tracing::info!("Using in-memory store; nothing survives a restart");
        Arc::new(MemoryStore::new())
    } else {
        let file = FileStore::open(&config.store_path)
            .await
            .with_context(|| format!("Failed to open store at {}", config.store_path.display()))?;
        tracing::info!("Persisting to {}", file.path().display());
        Arc::new(file)
    };

    let transport = Arc::new(
        actions::ReqwestTransport::new(config.action_timeout)
            .context("Failed to build HTTP client")?,
    );

    let bind_addr = config.bind_addr();
    let refresh_every = config.capture_mode_ttl.max(Duration::from_millis(500));
    let state = routes::AppState::new(config, store, transport);

    // Keep the capture-mode flag warm between events
    let _refresh = state.capture.clone().spawn_refresh(refresh_every);

    let app = routes::app(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
