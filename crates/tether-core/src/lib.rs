//! Tether core
//!
//! Sans-IO building blocks of the realtime channel. Nothing in this crate
//! performs I/O or reads the clock; time and entropy come in through
//! [`env::Environment`], and work for the driver goes out as
//! [`LifecycleAction`]s.
//!
//! # Components
//!
//! - [`Lifecycle`]: Connection state machine (handshake, heartbeats, reconnect)
//! - [`Backoff`]: Jittered exponential reconnect delays
//! - [`EventRouter`]: Local publish/subscribe by event name
//! - [`RoomRegistry`]: Remembered rooms, replayed after every reconnect

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod env;
pub mod error;
pub mod lifecycle;
pub mod rooms;
pub mod router;

pub use backoff::{Backoff, BackoffConfig};
pub use env::Environment;
pub use error::LifecycleError;
pub use lifecycle::{
    ConnectionState, Lifecycle, LifecycleAction, LifecycleConfig, StateChange, validate_token,
};
pub use rooms::{RoomMembership, RoomRegistry};
pub use router::{
    EmitReport, EventRouter, Handler, HandlerError, HandlerResult, HandlerToken, Subscription,
    decode_inbound,
};
