//! Codec for encoding and decoding Huddle frames.
//!
//! Frames are plain JSON objects, one per WebSocket message. Outbound
//! frames are encoded once by the hub and shared between every recipient.

use bytes::Bytes;
use thiserror::Error;

use crate::message::{ClientFrame, Message};

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// JSON decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Frame is not valid UTF-8 text.
    #[error("Invalid frame: {0}")]
    Invalid(String),
}

/// Encode a message to bytes.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode(message: &Message) -> Result<Bytes, ProtocolError> {
    let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
    Ok(Bytes::from(payload))
}

/// Decode a full server message from bytes.
///
/// # Errors
///
/// Returns an error if the data is not a valid message object.
pub fn decode(data: &[u8]) -> Result<Message, ProtocolError> {
    serde_json::from_slice(data).map_err(ProtocolError::Decode)
}

/// Decode a frame sent by a client.
///
/// # Errors
///
/// Returns an error if the data is not UTF-8 or not a JSON object.
pub fn decode_client(data: &[u8]) -> Result<ClientFrame, ProtocolError> {
    let text = std::str::from_utf8(data).map_err(|e| ProtocolError::Invalid(e.to_string()))?;
    serde_json::from_str(text).map_err(ProtocolError::Decode)
}
