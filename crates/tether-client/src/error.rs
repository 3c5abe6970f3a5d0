//! Errors surfaced to application code.

use tether_core::{ConnectionState, LifecycleError};
use tether_proto::ProtocolError;
use thiserror::Error;

use crate::transport::TransportError;

/// Session errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Token rejected before any I/O
    #[error("invalid token: {0}")]
    InvalidToken(&'static str),

    /// Operation not valid in the current state (e.g. `connect` twice)
    #[error("cannot {operation} while {state:?}")]
    InvalidState {
        /// State at the time of the call
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Handshake did not complete
    #[error("connect failed: {0}")]
    ConnectFailed(LifecycleError),

    /// Operation requires a connected session
    #[error("not connected (state: {state:?})")]
    NotConnected {
        /// State at the time of the call
        state: ConnectionState,
    },

    /// Event name is reserved for the session protocol or local delivery
    #[error("event {0:?} is reserved")]
    ReservedEvent(String),

    /// Connect or reconnect wait cancelled by a [`crate::Canceller`]
    #[error("cancelled")]
    Cancelled,

    /// Frame could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Transport I/O failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectFailed(e) => e.is_transient(),
            Self::NotConnected { .. } | Self::Transport(_) => true,
            Self::InvalidToken(_)
            | Self::InvalidState { .. }
            | Self::ReservedEvent(_)
            | Self::Cancelled
            | Self::Protocol(_) => false,
        }
    }
}

impl From<LifecycleError> for SessionError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::InvalidToken(reason) => Self::InvalidToken(reason),
            LifecycleError::InvalidState { state, operation } => {
                Self::InvalidState { state, operation }
            },
            other => Self::ConnectFailed(other),
        }
    }
}
