//! Event names.
//!
//! Wire events travel over the transport. Local events are only ever emitted
//! inside the client (via the router) and never appear on the wire.

/// Client handshake carrying the bearer token.
pub const HELLO: &str = "hello";
/// Server acceptance of the handshake.
pub const HELLO_REPLY: &str = "hello-reply";
/// Keepalive request.
pub const PING: &str = "ping";
/// Keepalive response.
pub const PONG: &str = "pong";
/// Server is closing the session.
pub const GOODBYE: &str = "goodbye";
/// Server-side error report (auth rejection, bad request).
pub const ERROR: &str = "error";

/// Join a room.
pub const JOIN_ROOM: &str = "join-room";
/// Leave a room.
pub const LEAVE_ROOM: &str = "leave-room";

/// Outbound chat message.
pub const SEND_MESSAGE: &str = "send-message";
/// Inbound chat message.
pub const MESSAGE_RECEIVED: &str = "message-received";

/// Outbound SDP offer.
pub const OFFER: &str = "offer";
/// Outbound SDP answer.
pub const ANSWER: &str = "answer";
/// Outbound ICE candidate.
pub const ICE_CANDIDATE: &str = "ice-candidate";
/// Inbound SDP offer.
pub const OFFER_RECEIVED: &str = "offer-received";
/// Inbound SDP answer.
pub const ANSWER_RECEIVED: &str = "answer-received";
/// Inbound ICE candidate.
pub const ICE_CANDIDATE_RECEIVED: &str = "ice-candidate-received";

/// Local: lifecycle state transition. Never sent on the wire.
pub const CONNECTION_STATE_CHANGED: &str = "connection-state-changed";

/// Events consumed by the connection lifecycle rather than routed to
/// application handlers.
pub const SESSION_EVENTS: [&str; 6] = [HELLO, HELLO_REPLY, PING, PONG, GOODBYE, ERROR];

/// Whether `name` belongs to the session vocabulary.
#[must_use]
pub fn is_session_event(name: &str) -> bool {
    SESSION_EVENTS.contains(&name)
}

/// Events emitted only inside the client. Inbound frames carrying these
/// names are dropped.
pub const LOCAL_EVENTS: [&str; 1] = [CONNECTION_STATE_CHANGED];

/// Whether `name` is a local-only event.
#[must_use]
pub fn is_local_event(name: &str) -> bool {
    LOCAL_EVENTS.contains(&name)
}

/// Whether application code may not send `name` directly.
///
/// Covers the session vocabulary, room membership (managed by the room
/// registry) and local-only events.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    is_session_event(name) || is_local_event(name) || name == JOIN_ROOM || name == LEAVE_ROOM
}
