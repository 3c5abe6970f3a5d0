//! Session management payloads: handshake, goodbye, errors.

use serde::{Deserialize, Serialize};

/// Protocol version sent in [`Hello`].
pub const PROTOCOL_VERSION: u8 = 1;

/// Client handshake.
///
/// The bearer token is supplied by the external auth collaborator and is
/// opaque to this layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Protocol version
    pub version: u8,
    /// Bearer token
    pub token: String,
}

/// Server acceptance of a [`Hello`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Server-assigned session identifier
    pub session_id: String,
    /// Authenticated user, if the server reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Server is closing the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    /// Human-readable reason
    #[serde(default)]
    pub reason: String,
}

/// Error payload for `error` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error code (HTTP-like).
    pub code: u16,
    /// Human-readable error message.
    #[serde(default)]
    pub message: String,
    /// Optional retry-after duration in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ErrorPayload {
    /// Request was malformed.
    pub const BAD_REQUEST: u16 = 400;
    /// Token missing, expired, or rejected.
    pub const UNAUTHORIZED: u16 = 401;
    /// Token valid but not allowed on this endpoint.
    pub const FORBIDDEN: u16 = 403;
    /// Room or session does not exist.
    pub const NOT_FOUND: u16 = 404;
    /// Server is overloaded; retry later.
    pub const UNAVAILABLE: u16 = 503;

    /// Create an auth rejection error.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self { code: Self::UNAUTHORIZED, message: message.into(), retry_after: None }
    }

    /// Create a server-unavailable error.
    pub fn unavailable(retry_after: Option<u64>) -> Self {
        Self { code: Self::UNAVAILABLE, message: "server unavailable".to_string(), retry_after }
    }

    /// Whether the server rejected the credentials.
    ///
    /// Retrying with the same token cannot succeed after an auth rejection.
    #[must_use]
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self.code, Self::UNAUTHORIZED | Self::FORBIDDEN)
    }
}
