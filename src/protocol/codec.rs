//! Frame codec
//!
//! Turns raw frame bytes into typed [`Message`] values and back. Decoding
//! happens in three stages so each failure maps to its own [`DecodeError`]:
//! parse the JSON object, resolve the `type` tag, then deserialize and
//! validate the fields of the resolved variant.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::protocol::message::{
    CoordinateSpace, CursorEvent, Handshake, HandshakeAck, LeaveEvent, Message,
};

/// Field carrying the message discriminator
const TYPE_FIELD: &str = "type";

/// Decode a single frame
pub fn decode(bytes: &[u8]) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(DecodeError::MalformedPayload(
            "frame is not a JSON object".to_string(),
        ));
    };

    let tag = match fields.remove(TYPE_FIELD) {
        Some(Value::String(tag)) => tag,
        Some(other) => {
            return Err(DecodeError::UnknownMessageType(format!(
                "type tag must be a string, got {}",
                other
            )))
        }
        None => {
            return Err(DecodeError::UnknownMessageType(
                "missing type tag".to_string(),
            ))
        }
    };

    match tag.as_str() {
        "init" => {
            let handshake: Handshake = fields_of(fields)?;
            Ok(Message::Handshake(Handshake {
                user_id: non_empty(handshake.user_id),
                page_id: non_empty(handshake.page_id),
            }))
        }
        "init-ack" => {
            let ack: HandshakeAck = fields_of(fields)?;
            Ok(Message::HandshakeAck(HandshakeAck {
                user_id: required(ack.user_id, "userId")?,
                page_id: non_empty(ack.page_id),
            }))
        }
        "cursor" => {
            let cursor: CursorEvent = fields_of(fields)?;
            validate_cursor(&cursor)?;
            Ok(Message::Cursor(CursorEvent {
                user_id: non_empty(cursor.user_id),
                page_id: non_empty(cursor.page_id),
                ..cursor
            }))
        }
        "cursor-leave" => {
            let leave: LeaveEvent = fields_of(fields)?;
            Ok(Message::Leave(LeaveEvent {
                user_id: required(leave.user_id, "userId")?,
                page_id: non_empty(leave.page_id),
            }))
        }
        other => Err(DecodeError::UnknownMessageType(other.to_string())),
    }
}

/// Decode a text frame
pub fn decode_text(text: &str) -> Result<Message, DecodeError> {
    decode(text.as_bytes())
}

/// Encode a message as a JSON text frame
pub fn encode(message: &Message) -> String {
    // Every message type is a flat struct of strings and numbers
    serde_json::to_string(message).expect("wire messages always serialize")
}

fn fields_of<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, DecodeError> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| DecodeError::InvalidField(e.to_string()))
}

fn validate_cursor(cursor: &CursorEvent) -> Result<(), DecodeError> {
    if !cursor.x.is_finite() || !cursor.y.is_finite() {
        return Err(DecodeError::InvalidField(
            "x and y must be finite numbers".to_string(),
        ));
    }

    for (name, value) in [("relativeX", cursor.relative_x), ("relativeY", cursor.relative_y)] {
        let Some(value) = value else { continue };

        if !(0.0..=1.0).contains(&value) {
            return Err(DecodeError::InvalidField(format!(
                "{} must be within [0, 1], got {}",
                name, value
            )));
        }
        if cursor.space != Some(CoordinateSpace::Element) {
            return Err(DecodeError::InvalidField(format!(
                "{} is only allowed in element space",
                name
            )));
        }
    }

    Ok(())
}

/// Empty identifiers are treated as absent
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn required(value: String, name: &str) -> Result<String, DecodeError> {
    if value.is_empty() {
        return Err(DecodeError::InvalidField(format!("{} must not be empty", name)));
    }
    Ok(value)
}
