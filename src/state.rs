//! Application state module
//!
//! Contains the shared state used across all relay connections.

use tokio::sync::broadcast;

use crate::config::ServerConfig;
use crate::net::session::SessionRegistry;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Registry of connected sessions
    pub registry: SessionRegistry,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state with an empty registry
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            config,
            registry: SessionRegistry::new(),
            shutdown_tx,
        }
    }

    /// Subscribe to the shutdown signal
    pub fn shutdown_signal(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal every listener and connection to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
