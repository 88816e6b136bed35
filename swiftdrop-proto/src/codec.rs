//! JSON encode/decode for push channel frames.
//!
//! The support backend speaks JSON on both the push channel and the REST
//! API, so frames are carried as WebSocket text payloads.

use crate::event::{ClientFrame, PushEvent};

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes a [`PushEvent`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the event cannot be serialized.
pub fn encode(event: &PushEvent) -> Result<String, CodecError> {
    serde_json::to_string(event).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`PushEvent`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the payload is not a valid
/// frame.
pub fn decode(payload: &str) -> Result<PushEvent, CodecError> {
    serde_json::from_str(payload).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Encodes a [`ClientFrame`] as a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<String, CodecError> {
    serde_json::to_string(frame).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`ClientFrame`] from a JSON string.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the payload is not a valid
/// frame.
pub fn decode_client(payload: &str) -> Result<ClientFrame, CodecError> {
    serde_json::from_str(payload).map_err(|e| CodecError::Serialization(e.to_string()))
}
