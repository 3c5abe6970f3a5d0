//! Typed view of the wire vocabulary.
//!
//! [`Frame`] keeps payloads as raw JSON so unknown events can still be routed.
//! `Payload` is the typed counterpart for the events this layer understands:
//! session management (hello, ping, ...), room membership, chat, and call
//! signaling.
//!
//! # Invariants
//!
//! Each variant maps to exactly one event name (enforced by match
//! exhaustiveness in [`Payload::event`]). Converting a payload into a frame and
//! back yields an equal payload.

pub mod chat;
pub mod room;
pub mod session;
pub mod signal;

use serde_json::Value;

use crate::{
    Frame,
    errors::{ProtocolError, Result},
    event,
};

/// All known frame payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    // Session management
    /// Client handshake
    Hello(session::Hello),
    /// Server accepted the handshake
    HelloReply(session::HelloReply),
    /// Keepalive request
    Ping,
    /// Keepalive response
    Pong,
    /// Server is closing the session
    Goodbye(session::Goodbye),
    /// Server error report
    Error(session::ErrorPayload),

    // Presence
    /// Join a room
    JoinRoom(room::RoomRequest),
    /// Leave a room
    LeaveRoom(room::RoomRequest),

    // Chat
    /// Outbound chat message
    SendMessage(chat::OutgoingMessage),
    /// Inbound chat message
    MessageReceived(chat::ChatMessage),

    // Signaling
    /// Outbound offer / answer / ICE candidate
    Signal(signal::SignalKind, signal::SignalRequest),
    /// Inbound offer / answer / ICE candidate
    SignalReceived(signal::SignalingMessage),
}

impl Payload {
    /// Event name corresponding to this payload.
    #[must_use]
    pub fn event(&self) -> &'static str {
        match self {
            Self::Hello(_) => event::HELLO,
            Self::HelloReply(_) => event::HELLO_REPLY,
            Self::Ping => event::PING,
            Self::Pong => event::PONG,
            Self::Goodbye(_) => event::GOODBYE,
            Self::Error(_) => event::ERROR,
            Self::JoinRoom(_) => event::JOIN_ROOM,
            Self::LeaveRoom(_) => event::LEAVE_ROOM,
            Self::SendMessage(_) => event::SEND_MESSAGE,
            Self::MessageReceived(_) => event::MESSAGE_RECEIVED,
            Self::Signal(kind, _) => kind.outbound_event(),
            Self::SignalReceived(msg) => msg.kind.inbound_event(),
        }
    }

    /// Wrap this payload in a frame.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::JsonEncode` if serialization fails
    pub fn into_frame(self) -> Result<Frame> {
        let name = self.event();

        match self {
            Self::Ping | Self::Pong => Ok(Frame::empty(name)),
            Self::Hello(inner) => Frame::from_payload(name, &inner),
            Self::HelloReply(inner) => Frame::from_payload(name, &inner),
            Self::Goodbye(inner) => Frame::from_payload(name, &inner),
            Self::Error(inner) => Frame::from_payload(name, &inner),
            Self::JoinRoom(inner) | Self::LeaveRoom(inner) => Frame::from_payload(name, &inner),
            Self::SendMessage(inner) => Frame::from_payload(name, &inner),
            Self::MessageReceived(inner) => Frame::from_payload(name, &inner),
            Self::Signal(_, inner) => Frame::from_payload(name, &inner),
            Self::SignalReceived(inner) => Frame::from_payload(name, &inner),
        }
    }

    /// Interpret a frame's payload according to its event name.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownEvent` if the event is not in the vocabulary
    /// - `ProtocolError::InvalidPayload` if the payload has the wrong shape
    pub fn from_frame(frame: &Frame) -> Result<Self> {
        let payload = match frame.event.as_str() {
            event::HELLO => Self::Hello(frame.payload_as()?),
            event::HELLO_REPLY => Self::HelloReply(frame.payload_as()?),
            event::PING => Self::Ping,
            event::PONG => Self::Pong,
            event::GOODBYE => match &frame.payload {
                Value::Null => Self::Goodbye(session::Goodbye { reason: String::new() }),
                _ => Self::Goodbye(frame.payload_as()?),
            },
            event::ERROR => Self::Error(frame.payload_as()?),
            event::JOIN_ROOM => Self::JoinRoom(frame.payload_as()?),
            event::LEAVE_ROOM => Self::LeaveRoom(frame.payload_as()?),
            event::SEND_MESSAGE => Self::SendMessage(frame.payload_as()?),
            event::MESSAGE_RECEIVED => Self::MessageReceived(frame.payload_as()?),
            name => {
                if let Some(kind) = signal::SignalKind::from_outbound_event(name) {
                    Self::Signal(kind, frame.payload_as()?)
                } else if let Some(kind) = signal::SignalKind::from_inbound_event(name) {
                    let mut msg: signal::SignalingMessage = frame.payload_as()?;
                    msg.kind = kind;
                    Self::SignalReceived(msg)
                } else {
                    return Err(ProtocolError::UnknownEvent(name.to_string()));
                }
            },
        };

        Ok(payload)
    }
}
