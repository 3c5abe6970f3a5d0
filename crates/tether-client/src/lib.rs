//! Tether client
//!
//! Drives the realtime channel: owns the transport, executes the
//! [`tether_core::Lifecycle`] state machine's actions, replays room joins
//! after every reconnect, and routes inbound events to registered handlers.
//!
//! # Components
//!
//! - [`Session`]: Connection owner and single writer
//! - [`Relay`]: Typed chat and call-signaling API over a session
//! - [`Transport`]: Frame transport abstraction
//! - [`SessionConfig`]: Endpoint, timeouts and backoff
//! - [`SystemEnv`]: Production clock and randomness
//!
//! # Transport (optional)
//!
//! With the `websocket` feature enabled, this crate also provides
//! [`websocket::WebSocketTransport`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod config;
mod error;
mod relay;
mod session;
mod system_env;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use config::{DEFAULT_ENDPOINT, SessionConfig};
pub use error::SessionError;
pub use relay::Relay;
pub use session::{Canceller, Session};
pub use system_env::SystemEnv;
pub use tether_core::{
    ConnectionState, EmitReport, Environment, HandlerResult, HandlerToken, StateChange,
    Subscription,
};
pub use transport::{Transport, TransportError};
