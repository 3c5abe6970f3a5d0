//! Frame type: event name plus opaque JSON payload.
//!
//! A `Frame` is the transport-layer unit. It holds the payload as a raw
//! [`serde_json::Value`] so the router can dispatch by name without knowing
//! the payload's shape. For typed access see [`crate::Payload::from_frame`]
//! and [`Frame::payload_as`].

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::errors::{ProtocolError, Result};

/// Maximum encoded frame size (1 MiB).
///
/// Signaling payloads (SDP) are a few kilobytes; chat content is bounded by
/// the REST layer. Anything larger is treated as malformed.
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Complete protocol frame
///
/// # Invariants
///
/// - `event` is never empty for a frame produced by [`Frame::decode`].
/// - Encoded size never exceeds [`MAX_FRAME_SIZE`]; enforced on both encode
///   and decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name used for routing
    pub event: String,

    /// Opaque JSON payload. Missing on the wire means `null`.
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    /// Create a frame from an event name and an already-built JSON value.
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self { event: event.into(), payload }
    }

    /// Create a frame with an empty (`null`) payload.
    pub fn empty(event: impl Into<String>) -> Self {
        Self::new(event, Value::Null)
    }

    /// Create a frame by serializing `payload`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::JsonEncode` if `payload` cannot be represented as JSON
    pub fn from_payload<T: Serialize>(event: impl Into<String>, payload: &T) -> Result<Self> {
        let value =
            serde_json::to_value(payload).map_err(|e| ProtocolError::JsonEncode(e.to_string()))?;
        Ok(Self::new(event, value))
    }

    /// Deserialize the payload into `T`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::InvalidPayload` if the payload has the wrong shape
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.payload).map_err(|e| ProtocolError::InvalidPayload {
            event: self.event.clone(),
            reason: e.to_string(),
        })
    }

    /// Encode to JSON text.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyEventName` if `event` is empty
    /// - `ProtocolError::FrameTooLarge` if the encoding exceeds the limit
    /// - `ProtocolError::JsonEncode` if serialization fails
    pub fn encode(&self) -> Result<String> {
        if self.event.is_empty() {
            return Err(ProtocolError::EmptyEventName);
        }

        let text =
            serde_json::to_string(self).map_err(|e| ProtocolError::JsonEncode(e.to_string()))?;

        if text.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: text.len(), max: MAX_FRAME_SIZE });
        }

        Ok(text)
    }

    /// Decode a frame from raw bytes.
    ///
    /// Never panics on arbitrary input; every invalid input is an error.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `bytes` exceeds the limit
    /// - `ProtocolError::MalformedFrame` if `bytes` is not a frame object
    /// - `ProtocolError::EmptyEventName` if the event name is empty
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: MAX_FRAME_SIZE });
        }

        let frame: Self = serde_json::from_slice(bytes)
            .map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

        if frame.event.is_empty() {
            return Err(ProtocolError::EmptyEventName);
        }

        Ok(frame)
    }
}
