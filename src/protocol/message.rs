//! Wire message definitions
//!
//! Every frame is a single JSON object tagged by its `type` field:
//!
//! | type           | direction        |
//! |----------------|------------------|
//! | `init`         | client -> server |
//! | `init-ack`     | server -> client |
//! | `cursor`       | both             |
//! | `cursor-leave` | server -> client |

use serde::{Deserialize, Serialize};

/// Coordinate space a cursor position is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateSpace {
    /// Pixels relative to the browser viewport
    Viewport,
    /// Offset inside a tracked element, optionally with normalized coordinates
    Element,
}

impl CoordinateSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewport => "viewport",
            Self::Element => "element",
        }
    }
}

impl std::fmt::Display for CoordinateSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handshake sent by a client after connecting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

/// Server confirmation of a client's identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeAck {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

/// A pointer position sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorEvent {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<CoordinateSpace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_y: Option<f64>,
}

impl CursorEvent {
    /// Viewport-space sample with no identity attached
    pub fn at(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            user_id: None,
            page_id: None,
            space: None,
            relative_x: None,
            relative_y: None,
        }
    }
}

/// Announces that a session has left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveEvent {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
}

/// Any frame on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    #[serde(rename = "init")]
    Handshake(Handshake),
    #[serde(rename = "init-ack")]
    HandshakeAck(HandshakeAck),
    #[serde(rename = "cursor")]
    Cursor(CursorEvent),
    #[serde(rename = "cursor-leave")]
    Leave(LeaveEvent),
}

impl Message {
    /// Wire tag of this message
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Handshake(_) => "init",
            Self::HandshakeAck(_) => "init-ack",
            Self::Cursor(_) => "cursor",
            Self::Leave(_) => "cursor-leave",
        }
    }

    /// Whether clients are allowed to send this message
    pub fn is_client_message(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::Cursor(_))
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name())
    }
}
