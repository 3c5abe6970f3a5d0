//! Connection lifecycle state machine.
//!
//! Manages the handshake, heartbeats, idle detection and the reconnect loop.
//! Uses the action pattern: methods take time (or an [`Environment`]) as input
//! and return [`LifecycleAction`]s for the driver to execute. No I/O happens
//! here, so every transition is testable without a network.
//!
//! # State Machine
//!
//! ```text
//!               connect(token)              hello-reply
//! ┌──────────────┐ ──────────> ┌────────────┐ ─────────> ┌───────────┐
//! │ Disconnected │             │ Connecting │            │ Connected │
//! └──────────────┘ <────────── └────────────┘            └───────────┘
//!        ^      first attempt failed  ^   │ retry failed       │
//!        │      or auth rejected      │   v                    │ drop / idle /
//!        │                       ┌──────────────┐ <────────────┘ goodbye
//!        └────── disconnect() ── │ Reconnecting │
//!                                └──────────────┘
//! ```
//!
//! `disconnect()` reaches Disconnected from every state. Reconnecting only
//! moves to Connecting together with an [`LifecycleAction::OpenTransport`].

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tether_proto::{ErrorPayload, Frame, Goodbye, Hello, HelloReply, PROTOCOL_VERSION, Payload, event};

use crate::{
    backoff::{Backoff, BackoffConfig},
    env::Environment,
    error::LifecycleError,
};

/// Time allowed to complete the hello / hello-reply handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum time allowed without any inbound frame before the connection is
/// considered dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Interval at which the client sends `ping` frames while connected.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);

/// Actions returned by the lifecycle state machine.
///
/// The driver executes these in order:
/// - `EmitState`: emit `connection-state-changed` locally
/// - `OpenTransport`: open a new transport handle (the prior one is closed)
/// - `SendFrame`: serialize and send the frame
/// - `ReplayRooms`: send a join for every remembered room, before anything else
/// - `ScheduleReconnect`: wait `delay`, then call [`Lifecycle::reconnect`]
/// - `Close`: close the transport handle with the given reason
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleAction {
    /// State changed; observers must be told
    EmitState(ConnectionState),

    /// Open the transport to the configured endpoint
    OpenTransport,

    /// Send this frame to the server
    SendFrame(Frame),

    /// Replay room joins for the new connection generation
    ReplayRooms,

    /// Retry after this delay
    ScheduleReconnect {
        /// How long to wait
        delay: Duration,
        /// 1-based attempt number this delay precedes
        attempt: u32,
    },

    /// Close the transport
    Close {
        /// Reason for closing the transport
        reason: String,
    },
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    /// No transport; initial and terminal state
    Disconnected,
    /// Transport opening or handshake in flight
    Connecting,
    /// Handshake accepted; traffic flows
    Connected,
    /// Unexpected drop; waiting for the next retry
    Reconnecting,
}

/// Payload of the local `connection-state-changed` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    /// New state
    pub state: ConnectionState,
    /// Number of successful handshakes so far
    pub generation: u64,
}

/// Lifecycle configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Timeout for completing the handshake
    pub handshake_timeout: Duration,
    /// Inbound silence tolerated before treating the connection as dropped
    pub idle_timeout: Duration,
    /// Heartbeat interval (should be < idle_timeout / 2)
    pub heartbeat_interval: Duration,
    /// Reconnect backoff policy
    pub backoff: BackoffConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Reject tokens that cannot possibly be a bearer token.
///
/// # Errors
///
/// - `LifecycleError::InvalidToken` for empty tokens or tokens containing
///   whitespace or control characters
pub fn validate_token(token: &str) -> Result<(), LifecycleError> {
    if token.is_empty() {
        return Err(LifecycleError::InvalidToken("token is empty"));
    }

    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(LifecycleError::InvalidToken("token contains whitespace or control characters"));
    }

    Ok(())
}

/// Connection lifecycle state machine
///
/// This is a pure state machine - no I/O, no Environment storage. Time and
/// entropy are passed to the methods that need them.
///
/// Generic over `Instant` to support both real time and virtual time for
/// deterministic testing.
#[derive(Debug, Clone)]
pub struct Lifecycle<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    state: ConnectionState,
    config: LifecycleConfig,
    backoff: Backoff,
    /// Token of the current attempt; last known good once connected
    token: Option<String>,
    /// Current `Connecting` is a reconnect attempt, not a caller `connect()`
    retrying: bool,
    generation: u64,
    session_id: Option<String>,
    handshake_started: Option<I>,
    last_activity: Option<I>,
    last_heartbeat: Option<I>,
    last_error: Option<LifecycleError>,
}

impl<I> Lifecycle<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a lifecycle in [`ConnectionState::Disconnected`]
    pub fn new(config: LifecycleConfig) -> Self {
        let backoff = Backoff::new(config.backoff);
        Self {
            state: ConnectionState::Disconnected,
            config,
            backoff,
            token: None,
            retrying: false,
            generation: 0,
            session_id: None,
            handshake_started: None,
            last_activity: None,
            last_heartbeat: None,
            last_error: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of successful handshakes. Bumped on every transition into
    /// Connected, so each reconnect starts a new generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Current state and generation, as emitted to observers.
    pub fn state_change(&self) -> StateChange {
        StateChange { state: self.state, generation: self.generation }
    }

    /// Session ID assigned by the server. `None` unless connected.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether the current or pending attempt belongs to the reconnect loop.
    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    /// Reconnect attempts made since the last successful handshake.
    pub fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    /// Why the last attempt failed, if it did.
    pub fn last_error(&self) -> Option<&LifecycleError> {
        self.last_error.as_ref()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Begin connecting with `token` (caller use).
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidToken` if the token is malformed
    /// - `LifecycleError::InvalidState` if not Disconnected
    pub fn connect(&mut self, token: &str, now: I) -> Result<Vec<LifecycleAction>, LifecycleError> {
        validate_token(token)?;

        if self.state != ConnectionState::Disconnected {
            return Err(LifecycleError::InvalidState { state: self.state, operation: "connect" });
        }

        self.token = Some(token.to_string());
        self.retrying = false;
        self.last_error = None;
        self.backoff.reset();

        Ok(self.start_attempt(now))
    }

    /// Begin the next reconnect attempt once the backoff delay elapsed.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidState` if not Reconnecting
    pub fn reconnect(&mut self, now: I) -> Result<Vec<LifecycleAction>, LifecycleError> {
        if self.state != ConnectionState::Reconnecting {
            return Err(LifecycleError::InvalidState { state: self.state, operation: "reconnect" });
        }

        Ok(self.start_attempt(now))
    }

    /// Transport opened; send the handshake.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::InvalidState` if not Connecting
    /// - `LifecycleError::Protocol` if the hello frame cannot be built
    pub fn transport_opened(&mut self) -> Result<Vec<LifecycleAction>, LifecycleError> {
        let (ConnectionState::Connecting, Some(token)) = (self.state, &self.token) else {
            return Err(LifecycleError::InvalidState {
                state: self.state,
                operation: "transport_opened",
            });
        };

        let hello = Payload::Hello(Hello { version: PROTOCOL_VERSION, token: token.clone() });
        let frame = hello.into_frame()?;

        Ok(vec![LifecycleAction::SendFrame(frame)])
    }

    /// Transport failed to open, or dropped.
    ///
    /// In Connecting this fails the attempt; in Connected it starts the
    /// reconnect loop. Stale reports in other states are ignored.
    pub fn transport_failed<E>(&mut self, reason: &str, env: &E) -> Vec<LifecycleAction>
    where
        E: Environment<Instant = I>,
    {
        match self.state {
            ConnectionState::Connecting => {
                self.fail_attempt(LifecycleError::Transport(reason.to_string()), env)
            },
            ConnectionState::Connected => self.connection_lost(reason, env),
            ConnectionState::Disconnected | ConnectionState::Reconnecting => Vec::new(),
        }
    }

    /// Mark the connection as active (call for every inbound frame).
    pub fn record_activity(&mut self, now: I) {
        if self.state == ConnectionState::Connected {
            self.last_activity = Some(now);
        }
    }

    /// Explicit disconnect (caller use). Valid from every state.
    ///
    /// Always asks the driver to close the transport, which must be
    /// idempotent. State is only re-emitted if it actually changed.
    pub fn disconnect(&mut self) -> Vec<LifecycleAction> {
        let was = self.state;

        self.reset_to_disconnected();
        self.last_error = None;

        let mut actions = vec![LifecycleAction::Close { reason: "client disconnect".to_string() }];
        if was != ConnectionState::Disconnected {
            actions.push(LifecycleAction::EmitState(ConnectionState::Disconnected));
        }
        actions
    }

    /// Earliest time at which [`Lifecycle::tick`] has work to do.
    pub fn next_deadline(&self) -> Option<I> {
        match self.state {
            ConnectionState::Connecting => {
                self.handshake_started.map(|start| start + self.config.handshake_timeout)
            },
            ConnectionState::Connected => {
                let idle = self.last_activity.map(|t| t + self.config.idle_timeout);
                let heartbeat = self.last_heartbeat.map(|t| t + self.config.heartbeat_interval);
                match (idle, heartbeat) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                }
            },
            ConnectionState::Disconnected | ConnectionState::Reconnecting => None,
        }
    }

    /// Process periodic maintenance (timeouts and heartbeats).
    pub fn tick<E>(&mut self, env: &E) -> Vec<LifecycleAction>
    where
        E: Environment<Instant = I>,
    {
        let now = env.now();

        match self.state {
            ConnectionState::Connecting => {
                let Some(started) = self.handshake_started else {
                    return Vec::new();
                };
                let elapsed = now - started;
                if elapsed >= self.config.handshake_timeout {
                    return self.fail_attempt(LifecycleError::HandshakeTimeout { elapsed }, env);
                }
                Vec::new()
            },
            ConnectionState::Connected => {
                if let Some(last) = self.last_activity {
                    let elapsed = now - last;
                    if elapsed >= self.config.idle_timeout {
                        return self.connection_lost(&format!("idle timeout after {elapsed:?}"), env);
                    }
                }

                let due = match self.last_heartbeat {
                    None => true,
                    Some(last) => now - last >= self.config.heartbeat_interval,
                };

                if due {
                    self.last_heartbeat = Some(now);
                    return vec![LifecycleAction::SendFrame(Frame::empty(event::PING))];
                }
                Vec::new()
            },
            ConnectionState::Disconnected | ConnectionState::Reconnecting => Vec::new(),
        }
    }

    /// Process an inbound session frame (see [`event::is_session_event`]).
    ///
    /// # Errors
    ///
    /// - `LifecycleError::UnexpectedFrame` if the event is invalid for the
    ///   current state
    /// - `LifecycleError::Protocol` if a reply frame cannot be built
    pub fn handle_frame<E>(
        &mut self,
        frame: &Frame,
        env: &E,
    ) -> Result<Vec<LifecycleAction>, LifecycleError>
    where
        E: Environment<Instant = I>,
    {
        let now = env.now();
        self.record_activity(now);

        match (self.state, frame.event.as_str()) {
            (ConnectionState::Connecting, event::HELLO_REPLY) => {
                match frame.payload_as::<HelloReply>() {
                    Ok(reply) => Ok(self.complete_handshake(reply, now)),
                    Err(e) => Ok(self.fail_attempt(LifecycleError::Protocol(e.to_string()), env)),
                }
            },

            (ConnectionState::Connecting, event::ERROR) => {
                let error = match frame.payload_as::<ErrorPayload>() {
                    Ok(err) => {
                        if let Some(secs) = err.retry_after {
                            self.backoff.defer_at_least(Duration::from_secs(secs));
                        }
                        LifecycleError::Rejected { code: err.code, message: err.message }
                    },
                    Err(e) => LifecycleError::Protocol(e.to_string()),
                };
                Ok(self.fail_attempt(error, env))
            },

            (ConnectionState::Connecting, event::GOODBYE) => Ok(self.fail_attempt(
                LifecycleError::Transport("server closed during handshake".to_string()),
                env,
            )),

            (ConnectionState::Connected, event::PING) => {
                Ok(vec![LifecycleAction::SendFrame(Payload::Pong.into_frame()?)])
            },

            // Activity already recorded
            (ConnectionState::Connected, event::PONG) => Ok(Vec::new()),

            (ConnectionState::Connected, event::GOODBYE) => {
                let reason = frame.payload_as::<Goodbye>().map(|g| g.reason).unwrap_or_default();
                Ok(self.connection_lost(&format!("peer goodbye: {reason}"), env))
            },

            (ConnectionState::Connected, event::ERROR) => {
                let Ok(err) = frame.payload_as::<ErrorPayload>() else {
                    tracing::warn!(payload = %frame.payload, "malformed error frame");
                    return Ok(Vec::new());
                };

                if err.is_auth_rejection() {
                    // Session revoked; the same token will not be accepted again
                    let reason = format!("session rejected ({}): {}", err.code, err.message);
                    self.reset_to_disconnected();
                    self.last_error =
                        Some(LifecycleError::Rejected { code: err.code, message: err.message });
                    return Ok(vec![
                        LifecycleAction::Close { reason },
                        LifecycleAction::EmitState(ConnectionState::Disconnected),
                    ]);
                }

                tracing::warn!(code = err.code, message = %err.message, "server reported error");
                Ok(Vec::new())
            },

            (state, name) => {
                Err(LifecycleError::UnexpectedFrame { state, event: name.to_string() })
            },
        }
    }

    fn start_attempt(&mut self, now: I) -> Vec<LifecycleAction> {
        self.state = ConnectionState::Connecting;
        self.session_id = None;
        self.handshake_started = Some(now);
        self.last_activity = None;
        self.last_heartbeat = None;

        vec![LifecycleAction::EmitState(ConnectionState::Connecting), LifecycleAction::OpenTransport]
    }

    fn complete_handshake(&mut self, reply: HelloReply, now: I) -> Vec<LifecycleAction> {
        self.state = ConnectionState::Connected;
        self.generation += 1;
        self.session_id = Some(reply.session_id);
        self.retrying = false;
        self.handshake_started = None;
        self.last_activity = Some(now);
        self.last_heartbeat = Some(now);
        self.last_error = None;
        self.backoff.reset();

        vec![LifecycleAction::EmitState(ConnectionState::Connected), LifecycleAction::ReplayRooms]
    }

    /// Connected -> Reconnecting.
    fn connection_lost<E>(&mut self, reason: &str, env: &E) -> Vec<LifecycleAction>
    where
        E: Environment<Instant = I>,
    {
        if self.state != ConnectionState::Connected {
            return Vec::new();
        }

        self.retrying = true;
        self.enter_reconnecting(reason.to_string(), env)
    }

    /// A Connecting attempt failed.
    ///
    /// Reconnect attempts keep retrying on transient errors. A caller
    /// `connect()` or a fatal error ends in Disconnected.
    fn fail_attempt<E>(&mut self, error: LifecycleError, env: &E) -> Vec<LifecycleAction>
    where
        E: Environment<Instant = I>,
    {
        let reason = error.to_string();
        let retry = self.retrying && error.is_transient();
        self.last_error = Some(error);

        if retry {
            return self.enter_reconnecting(reason, env);
        }

        self.reset_to_disconnected();
        vec![
            LifecycleAction::Close { reason },
            LifecycleAction::EmitState(ConnectionState::Disconnected),
        ]
    }

    fn enter_reconnecting<E>(&mut self, reason: String, env: &E) -> Vec<LifecycleAction>
    where
        E: Environment<Instant = I>,
    {
        self.state = ConnectionState::Reconnecting;
        self.session_id = None;
        self.handshake_started = None;
        self.last_activity = None;
        self.last_heartbeat = None;

        let delay = self.backoff.next_delay(env.random_u64());
        let attempt = self.backoff.attempt();

        vec![
            LifecycleAction::Close { reason },
            LifecycleAction::EmitState(ConnectionState::Reconnecting),
            LifecycleAction::ScheduleReconnect { delay, attempt },
        ]
    }

    fn reset_to_disconnected(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.token = None;
        self.retrying = false;
        self.session_id = None;
        self.handshake_started = None;
        self.last_activity = None;
        self.last_heartbeat = None;
        self.backoff.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Instant,
    };

    use serde_json::json;

    use super::*;

    /// Manually advanced clock with fixed entropy.
    #[derive(Clone)]
    struct TestEnv {
        base: Instant,
        offset_ms: Arc<AtomicU64>,
    }

    impl TestEnv {
        #[allow(clippy::disallowed_methods)]
        fn new() -> Self {
            Self { base: Instant::now(), offset_ms: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, by: Duration) {
            self.offset_ms.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Instant {
            self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }

        fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
            self.advance(duration);
            async {}
        }

        fn random_bytes(&self, buffer: &mut [u8]) {
            // Deterministic for tests
            buffer.fill(0);
        }
    }

    fn hello_reply() -> Frame {
        Frame::new(event::HELLO_REPLY, json!({ "session_id": "sess-1" }))
    }

    fn connected(env: &TestEnv) -> Lifecycle<Instant> {
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        lc.connect("tok-1", env.now()).unwrap();
        lc.transport_opened().unwrap();
        lc.handle_frame(&hello_reply(), env).unwrap();
        assert_eq!(lc.state(), ConnectionState::Connected);
        lc
    }

    fn scheduled_delay(actions: &[LifecycleAction]) -> Option<Duration> {
        actions.iter().find_map(|a| match a {
            LifecycleAction::ScheduleReconnect { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    #[test]
    fn connect_lifecycle() {
        let env = TestEnv::new();
        let mut lc = Lifecycle::new(LifecycleConfig::default());

        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert_eq!(lc.generation(), 0);

        let actions = lc.connect("tok-1", env.now()).unwrap();
        assert_eq!(lc.state(), ConnectionState::Connecting);
        assert_eq!(actions, vec![
            LifecycleAction::EmitState(ConnectionState::Connecting),
            LifecycleAction::OpenTransport,
        ]);

        let actions = lc.transport_opened().unwrap();
        match &actions[..] {
            [LifecycleAction::SendFrame(frame)] => {
                assert_eq!(frame.event, "hello");
                assert_eq!(frame.payload, json!({ "version": 1, "token": "tok-1" }));
            },
            other => panic!("expected hello frame, got {other:?}"),
        }

        let actions = lc.handle_frame(&hello_reply(), &env).unwrap();
        assert_eq!(lc.state(), ConnectionState::Connected);
        assert_eq!(lc.generation(), 1);
        assert_eq!(lc.session_id(), Some("sess-1"));
        assert_eq!(actions, vec![
            LifecycleAction::EmitState(ConnectionState::Connected),
            LifecycleAction::ReplayRooms,
        ]);
    }

    #[test]
    fn connect_rejects_bad_tokens() {
        let env = TestEnv::new();
        let mut lc: Lifecycle<Instant> = Lifecycle::new(LifecycleConfig::default());

        for token in ["", "tok en", "tok\n", "\u{7}"] {
            assert!(matches!(lc.connect(token, env.now()), Err(LifecycleError::InvalidToken(_))));
            assert_eq!(lc.state(), ConnectionState::Disconnected);
        }
    }

    #[test]
    fn connect_twice_is_invalid_state() {
        let env = TestEnv::new();
        let mut lc = connected(&env);
        let result = lc.connect("tok-2", env.now());
        assert!(matches!(result, Err(LifecycleError::InvalidState { .. })));
    }

    #[test]
    fn first_attempt_rejection_ends_disconnected() {
        let env = TestEnv::new();
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        lc.connect("tok-1", env.now()).unwrap();
        lc.transport_opened().unwrap();

        let rejection = Payload::Error(ErrorPayload::unauthorized("expired")).into_frame().unwrap();
        let actions = lc.handle_frame(&rejection, &env).unwrap();

        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert!(matches!(actions[0], LifecycleAction::Close { .. }));
        assert_eq!(actions[1], LifecycleAction::EmitState(ConnectionState::Disconnected));
        assert!(matches!(lc.last_error(), Some(LifecycleError::Rejected { code: 401, .. })));
    }

    #[test]
    fn first_attempt_transport_refusal_ends_disconnected() {
        let env = TestEnv::new();
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        lc.connect("tok-1", env.now()).unwrap();

        let actions = lc.transport_failed("connection refused", &env);
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert!(scheduled_delay(&actions).is_none());
        assert!(matches!(lc.last_error(), Some(LifecycleError::Transport(_))));
    }

    #[test]
    fn malformed_hello_reply_fails_attempt() {
        let env = TestEnv::new();
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        lc.connect("tok-1", env.now()).unwrap();
        lc.transport_opened().unwrap();

        let bogus = Frame::new(event::HELLO_REPLY, json!("ok"));
        lc.handle_frame(&bogus, &env).unwrap();
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert!(matches!(lc.last_error(), Some(LifecycleError::Protocol(_))));
    }

    #[test]
    fn handshake_timeout_fails_attempt() {
        let env = TestEnv::new();
        let mut lc = Lifecycle::new(LifecycleConfig::default());
        lc.connect("tok-1", env.now()).unwrap();
        lc.transport_opened().unwrap();

        env.advance(Duration::from_secs(10));
        assert!(lc.tick(&env).is_empty());

        env.advance(DEFAULT_HANDSHAKE_TIMEOUT);
        lc.tick(&env);
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert!(matches!(lc.last_error(), Some(LifecycleError::HandshakeTimeout { .. })));
    }

    #[test]
    fn drop_enters_reconnecting_with_backoff() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let actions = lc.transport_failed("connection reset", &env);
        assert_eq!(lc.state(), ConnectionState::Reconnecting);
        assert!(lc.is_retrying());
        assert!(matches!(actions[0], LifecycleAction::Close { .. }));
        assert_eq!(actions[1], LifecycleAction::EmitState(ConnectionState::Reconnecting));
        assert_eq!(scheduled_delay(&actions), Some(Duration::from_secs(1)));
    }

    #[test]
    fn reconnect_opens_transport_and_reuses_token() {
        let env = TestEnv::new();
        let mut lc = connected(&env);
        lc.transport_failed("connection reset", &env);

        let actions = lc.reconnect(env.now()).unwrap();
        assert_eq!(lc.state(), ConnectionState::Connecting);
        assert!(actions.contains(&LifecycleAction::OpenTransport));

        let actions = lc.transport_opened().unwrap();
        match &actions[..] {
            [LifecycleAction::SendFrame(frame)] => {
                assert_eq!(frame.payload["token"], json!("tok-1"));
            },
            other => panic!("expected hello frame, got {other:?}"),
        }

        lc.handle_frame(&hello_reply(), &env).unwrap();
        assert_eq!(lc.state(), ConnectionState::Connected);
        assert_eq!(lc.generation(), 2);
        assert!(!lc.is_retrying());
        assert_eq!(lc.attempt(), 0);
    }

    #[test]
    fn failed_retries_back_off_further() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let mut delays = vec![scheduled_delay(&lc.transport_failed("reset", &env)).unwrap()];
        for _ in 0..6 {
            lc.reconnect(env.now()).unwrap();
            let actions = lc.transport_failed("refused", &env);
            assert_eq!(lc.state(), ConnectionState::Reconnecting);
            delays.push(scheduled_delay(&actions).unwrap());
        }

        let secs: Vec<u64> = delays.iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn reconnect_auth_rejection_stops_retrying() {
        let env = TestEnv::new();
        let mut lc = connected(&env);
        lc.transport_failed("reset", &env);
        lc.reconnect(env.now()).unwrap();
        lc.transport_opened().unwrap();

        let rejection = Payload::Error(ErrorPayload::unauthorized("expired")).into_frame().unwrap();
        let actions = lc.handle_frame(&rejection, &env).unwrap();

        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert!(scheduled_delay(&actions).is_none());
    }

    #[test]
    fn unavailable_retry_after_delays_next_attempt() {
        let env = TestEnv::new();
        let mut lc = connected(&env);
        lc.transport_failed("reset", &env);
        lc.reconnect(env.now()).unwrap();
        lc.transport_opened().unwrap();

        let busy = Payload::Error(ErrorPayload::unavailable(Some(45))).into_frame().unwrap();
        let actions = lc.handle_frame(&busy, &env).unwrap();

        assert_eq!(lc.state(), ConnectionState::Reconnecting);
        let delay = scheduled_delay(&actions).unwrap();
        assert!(delay >= Duration::from_secs(45), "hint ignored: {delay:?}");
    }

    #[test]
    fn reconnect_only_from_reconnecting() {
        let env = TestEnv::new();
        let mut lc = connected(&env);
        assert!(matches!(lc.reconnect(env.now()), Err(LifecycleError::InvalidState { .. })));
    }

    #[test]
    fn disconnect_from_every_state() {
        let env = TestEnv::new();

        let mut lc: Lifecycle<Instant> = Lifecycle::new(LifecycleConfig::default());
        let actions = lc.disconnect();
        assert_eq!(actions.len(), 1, "already disconnected: close only, no state change");

        lc.connect("tok-1", env.now()).unwrap();
        assert!(lc.disconnect().contains(&LifecycleAction::EmitState(ConnectionState::Disconnected)));

        let mut lc = connected(&env);
        lc.disconnect();
        assert_eq!(lc.state(), ConnectionState::Disconnected);

        let mut lc = connected(&env);
        lc.transport_failed("reset", &env);
        lc.disconnect();
        assert_eq!(lc.state(), ConnectionState::Disconnected);
        assert!(matches!(lc.reconnect(env.now()), Err(LifecycleError::InvalidState { .. })));
    }

    #[test]
    fn ping_is_answered_with_pong() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let actions = lc.handle_frame(&Frame::empty(event::PING), &env).unwrap();
        assert_eq!(actions, vec![LifecycleAction::SendFrame(Frame::empty(event::PONG))]);
    }

    #[test]
    fn heartbeat_sent_after_interval() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        assert!(lc.tick(&env).is_empty());

        env.advance(DEFAULT_HEARTBEAT_INTERVAL);
        let actions = lc.tick(&env);
        assert_eq!(actions, vec![LifecycleAction::SendFrame(Frame::empty(event::PING))]);

        // Not again until the next interval
        assert!(lc.tick(&env).is_empty());
    }

    #[test]
    fn idle_timeout_triggers_reconnect() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        env.advance(Duration::from_secs(40));
        lc.handle_frame(&Frame::empty(event::PONG), &env).unwrap();

        // 70s since connect, only 30s since last activity
        env.advance(Duration::from_secs(30));
        lc.tick(&env);
        assert_eq!(lc.state(), ConnectionState::Connected);

        env.advance(DEFAULT_IDLE_TIMEOUT);
        lc.tick(&env);
        assert_eq!(lc.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn goodbye_while_connected_reconnects() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let goodbye = Payload::Goodbye(Goodbye { reason: "restart".into() }).into_frame().unwrap();
        let actions = lc.handle_frame(&goodbye, &env).unwrap();
        assert_eq!(lc.state(), ConnectionState::Reconnecting);
        assert!(scheduled_delay(&actions).is_some());
    }

    #[test]
    fn auth_error_while_connected_disconnects() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let rejection = Payload::Error(ErrorPayload::unauthorized("revoked")).into_frame().unwrap();
        lc.handle_frame(&rejection, &env).unwrap();
        assert_eq!(lc.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn non_auth_error_while_connected_is_logged_only() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let not_found = Frame::new(event::ERROR, json!({ "code": 404, "message": "no room" }));
        assert!(lc.handle_frame(&not_found, &env).unwrap().is_empty());
        assert_eq!(lc.state(), ConnectionState::Connected);
    }

    #[test]
    fn unexpected_session_frames_are_errors() {
        let env = TestEnv::new();
        let mut lc = connected(&env);

        let result = lc.handle_frame(&hello_reply(), &env);
        assert!(matches!(result, Err(LifecycleError::UnexpectedFrame { .. })));

        let mut idle: Lifecycle<Instant> = Lifecycle::new(LifecycleConfig::default());
        let result = idle.handle_frame(&Frame::empty(event::PING), &env);
        assert!(matches!(result, Err(LifecycleError::UnexpectedFrame { .. })));
    }

    #[test]
    fn next_deadline_tracks_state() {
        let env = TestEnv::new();
        let mut lc: Lifecycle<Instant> = Lifecycle::new(LifecycleConfig::default());
        assert!(lc.next_deadline().is_none());

        let t0 = env.now();
        lc.connect("tok-1", t0).unwrap();
        assert_eq!(lc.next_deadline(), Some(t0 + DEFAULT_HANDSHAKE_TIMEOUT));

        lc.transport_opened().unwrap();
        lc.handle_frame(&hello_reply(), &env).unwrap();
        assert_eq!(lc.next_deadline(), Some(t0 + DEFAULT_HEARTBEAT_INTERVAL));
    }

    #[test]
    fn state_change_serializes_kebab_case() {
        let change = StateChange { state: ConnectionState::Reconnecting, generation: 3 };
        assert_eq!(
            serde_json::to_value(change).unwrap(),
            json!({ "state": "reconnecting", "generation": 3 })
        );
    }
}
