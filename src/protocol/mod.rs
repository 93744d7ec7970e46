//! Protocol module
//!
//! This module contains the cursor relay wire protocol:
//! - Message types (handshake, acknowledgement, cursor, leave)
//! - JSON frame codec with shape validation

pub mod codec;
pub mod message;

pub use codec::{decode, decode_text, encode};
pub use message::{CoordinateSpace, CursorEvent, Handshake, HandshakeAck, LeaveEvent, Message};
