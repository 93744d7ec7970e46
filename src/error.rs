//! Error handling module
//!
//! Defines custom error types for the Mirromaus relay server.

use std::io;

use thiserror::Error;

/// Main error type for the relay server
#[derive(Error, Debug)]
pub enum RelayError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Wire protocol errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] DecodeError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// The peer closed the connection (a lifecycle event, not a fault)
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timeout")]
    Timeout,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The recipient transport is closed or its outbound buffer is full
    #[error("Transport not writable")]
    TransportUnwritable,

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Decode failures for a single inbound frame.
///
/// All variants are recoverable: the frame is dropped and the connection
/// keeps processing subsequent frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}

impl DecodeError {
    /// Short name used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::UnknownMessageType(_) => "unknown_message_type",
            Self::InvalidField(_) => "invalid_field",
        }
    }
}

impl From<tungstenite::Error> for RelayError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                RelayError::Network(NetworkError::ConnectionClosed)
            }
            other => RelayError::Network(NetworkError::WebSocket(other.to_string())),
        }
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = DecodeError::InvalidField("x must be a number".to_string());
        assert_eq!(err.to_string(), "Invalid field: x must be a number");

        let err = RelayError::from(NetworkError::TransportUnwritable);
        assert_eq!(err.to_string(), "Network error: Transport not writable");
    }

    #[test]
    fn test_decode_error_kind() {
        assert_eq!(
            DecodeError::MalformedPayload(String::new()).kind(),
            "malformed_payload"
        );
        assert_eq!(
            DecodeError::UnknownMessageType("ping".into()).kind(),
            "unknown_message_type"
        );
        assert_eq!(DecodeError::InvalidField("y".into()).kind(), "invalid_field");
    }

    #[test]
    fn test_tungstenite_closed_maps_to_connection_closed() {
        let err: RelayError = tungstenite::Error::ConnectionClosed.into();
        assert!(matches!(
            err,
            RelayError::Network(NetworkError::ConnectionClosed)
        ));
    }
}
