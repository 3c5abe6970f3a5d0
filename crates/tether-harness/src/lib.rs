//! Deterministic simulation harness for the Tether realtime channel.
//!
//! In-memory implementations of the Environment and Transport traits for
//! deterministic, reproducible testing of connect, drop and reconnect
//! sequences without a network or a real clock.
//!
//! # Components
//!
//! - [`SimEnv`]: Virtual clock and seeded RNG
//! - [`SimTransport`]: Scripted server with fault injection
//! - [`EventLog`]: Recording handlers for oracles

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event_log;
pub mod sim_env;
pub mod sim_transport;

pub use event_log::{EventLog, LoggedEvent};
pub use sim_env::{SimEnv, SimInstant};
pub use sim_transport::{Handshake, SentFrame, ServerScript, SimTransport};

use tether_client::{Session, SessionConfig};

/// Endpoint used by simulated sessions.
pub const SIM_ENDPOINT: &str = "sim://realtime";

/// Disconnected session over a fresh [`SimTransport`] and [`SimEnv`].
///
/// Returns the transport's server handle alongside the session.
pub fn sim_session(seed: u64) -> (Session<SimTransport, SimEnv>, SimTransport, SimEnv) {
    sim_session_with(seed, ServerScript::default())
}

/// Like [`sim_session`] with a custom server script.
pub fn sim_session_with(
    seed: u64,
    script: ServerScript,
) -> (Session<SimTransport, SimEnv>, SimTransport, SimEnv) {
    let transport = SimTransport::with_script(script);
    let env = SimEnv::with_seed(seed);
    let session = Session::new(transport.clone(), env.clone(), SessionConfig::new(SIM_ENDPOINT));
    (session, transport, env)
}
