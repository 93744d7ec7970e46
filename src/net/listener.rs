//! Listener module
//!
//! Accepts TCP connections and hands each one to its own connection task.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::net::handler::ConnectionHandler;
use crate::AppState;

/// Accept incoming WebSocket connections until shutdown is signalled.
///
/// Every connection runs in its own task; an error in one connection is
/// logged and never affects the others.
pub async fn accept_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New WebSocket connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_websocket(stream, addr).await {
                                warn!("WebSocket connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("WebSocket connection acceptor shutting down");
                break;
            }
        }
    }
}
