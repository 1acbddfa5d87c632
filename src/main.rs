//! Reactive Cache admin server
//!
//! Serves one keyed cache of JSON values over HTTP, on the process-wide
//! event bus.

use std::net::SocketAddr;

use anyhow::Context;
use tokio::{signal, task::JoinHandle};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use reactive_cache::{api::create_router, spawn_sweep_task, AppState, CacheContext, Config};

/// Main entry point for the cache admin server.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the shared context and the admin cache
/// 4. Start the expiry sweep if an interval is configured
/// 5. Serve the router until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reactive_cache=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Reactive Cache server");

    let config = Config::from_env();
    info!(
        "Configuration loaded: max_size={}, ttl={}ms, port={}, sweep_interval={}ms",
        config.max_size, config.ttl_ms, config.server_port, config.sweep_interval_ms
    );

    let context = CacheContext::new(config.clone());
    let state = AppState::from_context(&context);
    info!("Keyed cache initialized");

    let sweep_handle = config.sweep_interval().map(|interval| {
        info!("Background expiry sweep started");
        spawn_sweep_task(state.cache.clone(), interval)
    });

    let app = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(sweep_handle))
        .await
        .context("server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM), then stops the sweep.
async fn shutdown_signal(sweep_handle: Option<JoinHandle<()>>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    if let Some(handle) = sweep_handle {
        handle.abort();
        warn!("Expiry sweep task aborted");
    }
}
