//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or interpreting wire data.
///
/// None of these are surfaced to application handlers. Inbound decoding
/// failures are logged and the frame is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bytes are not a valid JSON frame object
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// Encoded frame exceeds [`crate::MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Frame has an empty event name
    #[error("frame has empty event name")]
    EmptyEventName,

    /// Event name is not part of the known vocabulary
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Payload does not match the shape expected for its event
    #[error("invalid payload for {event}: {reason}")]
    InvalidPayload {
        /// Event the payload was attached to
        event: String,
        /// Deserializer message
        reason: String,
    },

    /// Serialization failed
    #[error("JSON encode failed: {0}")]
    JsonEncode(String),
}
