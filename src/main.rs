//! MT5 TCP Bridge server
//!
//! HTTP API for callers, raw TCP listener for the Expert Advisor.

use mt5_bridge::api::{create_router, AppState};
use mt5_bridge::{Bridge, BridgeConfig};

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting MT5 TCP Bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = BridgeConfig::from_env()?;
    config.log_summary();

    let bridge = Arc::new(Bridge::from_config(&config));

    // EA listener runs on its own task for the life of the process
    let acceptor = bridge.bind(&config).await?;
    let acceptor_task = acceptor.spawn();

    let state = Arc::new(AppState {
        bridge: Arc::clone(&bridge),
        config: config.clone(),
    });
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind((config.http_host.as_str(), config.http_port)).await?;
    info!("Starting API server on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bridge.shutdown();
    if let Err(e) = acceptor_task.await {
        error!("Acceptor task ended abnormally: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received, starting graceful shutdown...");
}
