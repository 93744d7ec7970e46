//! Mirromaus Cursor Relay Library
//!
//! This library relays live pointer positions between browser clients that
//! share a page. Clients connect over WebSocket, identify themselves with a
//! handshake and then stream cursor samples that the relay fans out to the
//! other sessions on the same page.
//!
//! ## Modules
//!
//! - `api` - Management HTTP endpoints (health, statistics)
//! - `client` - Native relay client
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `net` - Network handling and session management
//! - `protocol` - Wire messages and the JSON frame codec
//! - `routing` - Recipient selection for inbound messages

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod routing;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{RelayError, Result};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
