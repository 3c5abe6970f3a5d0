//! Transport abstraction for the realtime channel.
//!
//! A transport carries whole text frames in both directions over one
//! connection. Production uses a WebSocket (feature `websocket`), tests use
//! the scripted in-memory transport from `tether-harness`.
//!
//! The [`crate::Session`] owns exactly one transport and reuses it across
//! reconnects: `close` always precedes the next `open`, so there is never
//! more than one live connection per session.

use async_trait::async_trait;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// Connection broke while reading.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Operation requires an open connection.
    #[error("transport is closed")]
    Closed,
}

/// Bidirectional frame transport.
///
/// Implementations MUST guarantee:
///
/// - `recv` is cancel-safe (it is raced against timers)
/// - `close` is idempotent and never fails
/// - frames are delivered in the order they were sent
#[async_trait]
pub trait Transport: Send + 'static {
    /// Connect to `endpoint`. Any previous connection is closed first.
    async fn open(&mut self, endpoint: &str) -> Result<(), TransportError>;

    /// Write one encoded frame.
    ///
    /// Returns once the transport accepted the frame for delivery.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Wait for the next inbound message.
    ///
    /// Returns `None` once the connection has ended (peer close or drop).
    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>>;

    /// Close the connection.
    async fn close(&mut self);

    /// Whether a connection is currently open.
    fn is_open(&self) -> bool;
}
