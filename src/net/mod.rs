//! Networking module
//!
//! This module handles all network-related functionality for the relay:
//! - WebSocket accept loop
//! - Session registry
//! - Connection lifecycle

pub mod handler;
pub mod listener;
pub mod session;
