//! Mirromaus Cursor Relay Server
//!
//! Relays live cursor positions between WebSocket clients on the same page,
//! with a small HTTP API for health and statistics.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use mirromaus::api;
use mirromaus::config::ServerConfig;
use mirromaus::net::listener::accept_connections;
use mirromaus::state::AppState;
use mirromaus::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    // Pick up settings from a local .env file, if present
    dotenv::dotenv().ok();

    let config = ServerConfig::load().await?;

    init_logging(config.debug);

    info!("Mirromaus cursor relay v{}", VERSION);
    if config.config_path.exists() {
        info!(
            "Configuration loaded from: {}",
            config.config_path.display()
        );
    } else {
        warn!(
            "Config file not found at {}, using defaults",
            config.config_path.display()
        );
    }

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone()));

    // Start WebSocket listener for browser clients
    let ws_addr: SocketAddr = config.websocket_addr().parse()?;
    let ws_listener = TcpListener::bind(ws_addr).await?;
    info!("WebSocket server listening on: {}", ws_addr);

    let ws_state = state.clone();
    let ws_shutdown_rx = shutdown_tx.subscribe();
    let ws_handle = tokio::spawn(async move {
        accept_connections(ws_listener, ws_state, ws_shutdown_rx).await;
    });

    // Start HTTP API server if enabled
    let api_handle = if config.management_enabled {
        let api_addr: SocketAddr = config.management_addr().parse()?;
        let api_listener = TcpListener::bind(api_addr).await?;
        info!("Management API listening on: {}", api_addr);

        let api_state = state.clone();
        let api_shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            run_api_server(api_listener, api_state, api_shutdown_rx).await;
        }))
    } else {
        None
    };

    info!("{} is ready for connections", config.server_name);

    wait_for_shutdown(shutdown_tx.clone()).await;

    info!("Shutting down server...");

    let _ = ws_handle.await;
    if let Some(handle) = api_handle {
        let _ = handle.await;
    }

    state.registry.close_all();
    info!("All sessions closed");

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
fn init_logging(debug: bool) {
    let default_filter = if debug {
        "info,mirromaus=trace"
    } else {
        "info,mirromaus=debug"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true)
        .init();
}

/// Run the HTTP management API
async fn run_api_server(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let router = api::create_router(state);

    let shutdown_signal = async move {
        let _ = shutdown_rx.recv().await;
        info!("Management API shutting down");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .unwrap_or_else(|e| error!("API server error: {}", e));
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(shutdown_tx: broadcast::Sender<()>) {
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
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    let _ = shutdown_tx.send(());
}
