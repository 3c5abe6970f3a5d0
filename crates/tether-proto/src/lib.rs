//! Tether wire protocol
//!
//! Every frame on the realtime channel is a JSON object carrying an event name
//! and a JSON payload:
//!
//! ```text
//! { "event": "send-message", "payload": { "room_id": "room-1", "content": "hi" } }
//! ```
//!
//! The transport never looks inside the payload. Session-level events
//! (handshake, heartbeats, errors) are consumed by the connection lifecycle;
//! everything else is routed by event name to application handlers.
//!
//! # Components
//!
//! - [`Frame`]: Event name plus raw JSON payload (transport layer)
//! - [`Payload`]: Typed view of the known vocabulary
//! - [`event`]: Event name constants, wire and local
//! - [`ProtocolError`]: Framing and payload errors

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod errors;
pub mod event;
mod frame;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::{Frame, MAX_FRAME_SIZE};
pub use payloads::{
    Payload,
    chat::{ChatMessage, OutgoingMessage},
    room::RoomRequest,
    session::{ErrorPayload, Goodbye, Hello, HelloReply, PROTOCOL_VERSION},
    signal::{SignalKind, SignalRequest, SignalingMessage},
};

/// Logical room identifier (per-user inbox or per-call session).
pub type RoomId = String;

/// Identifier of a user on the platform.
pub type UserId = String;
