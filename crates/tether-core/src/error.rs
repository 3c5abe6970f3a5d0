//! Error types for the connection state machine.
//!
//! Caller errors (bad token, wrong state) are separated from handshake
//! failures so the driver can decide between surfacing an error and entering
//! the reconnect loop.

use std::time::Duration;

use thiserror::Error;

use crate::lifecycle::ConnectionState;

/// Errors that can occur during lifecycle operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// Token is empty or contains characters that cannot be a bearer token
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),

    /// Operation not valid in the current state
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State at the time of the call
        state: ConnectionState,
        /// Rejected operation
        operation: &'static str,
    },

    /// Received a session frame that makes no sense in the current state
    #[error("unexpected frame: received {event} in state {state:?}")]
    UnexpectedFrame {
        /// State when the frame arrived
        state: ConnectionState,
        /// Event name of the unexpected frame
        event: String,
    },

    /// No `hello-reply` within the handshake timeout
    #[error("handshake timeout after {elapsed:?}")]
    HandshakeTimeout {
        /// How long we waited
        elapsed: Duration,
    },

    /// Server rejected the handshake
    #[error("handshake rejected ({code}): {message}")]
    Rejected {
        /// Error code from the server
        code: u16,
        /// Server message
        message: String,
    },

    /// Handshake response could not be interpreted
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport refused, dropped, or closed during the handshake
    #[error("transport error: {0}")]
    Transport(String),
}

impl LifecycleError {
    /// Whether a reconnect attempt with the same token could succeed.
    ///
    /// Caller errors and auth rejections are never transient: retrying with the
    /// same token and state cannot change the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::HandshakeTimeout { .. } | Self::Protocol(_) | Self::Transport(_) => true,
            Self::Rejected { code, .. } => !matches!(code, 401 | 403),
            Self::InvalidToken(_) | Self::InvalidState { .. } | Self::UnexpectedFrame { .. } => {
                false
            },
        }
    }
}

impl From<tether_proto::ProtocolError> for LifecycleError {
    fn from(err: tether_proto::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}
