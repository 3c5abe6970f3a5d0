//! Session driver.
//!
//! [`Session`] owns the transport and executes the actions produced by the
//! Sans-IO [`Lifecycle`]. It is the single writer on the connection: every
//! outbound frame (handshake, heartbeats, room replay, application traffic)
//! goes through it, so ordering on the wire is the order of calls here.
//!
//! The session is single-task. `connect`, `step` and the send paths are
//! `async` and suspend on transport I/O and timers; handlers registered with
//! [`Session::on`] run synchronously inside those calls.
//!
//! # Room replay
//!
//! When a handshake completes, the lifecycle emits `ReplayRooms` and the
//! session sends a `join-room` for every remembered room before returning to
//! the caller. Application sends need `&mut Session`, so none can be accepted
//! for a new connection generation before its replay is on the wire.

use std::{collections::VecDeque, future, sync::Arc, time::Duration};

use serde_json::Value;
use tether_core::{
    ConnectionState, EmitReport, Environment, EventRouter, HandlerResult, HandlerToken, Lifecycle,
    LifecycleAction, LifecycleError, RoomRegistry, StateChange, Subscription, decode_inbound,
    rooms,
};
use tether_proto::{Frame, Payload, event};
use tokio::sync::watch;

use crate::{
    SessionConfig, SessionError,
    relay::Relay,
    transport::{Transport, TransportError},
};

/// Handle that cancels an in-flight `connect` or reconnect wait.
///
/// Cloneable and usable from any task. A cancelled session ends in
/// [`ConnectionState::Disconnected`] exactly as after
/// [`Session::disconnect`].
#[derive(Debug, Clone)]
pub struct Canceller {
    tx: Arc<watch::Sender<u64>>,
}

impl Canceller {
    fn new() -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        (Self { tx: Arc::new(tx) }, rx)
    }

    /// Request cancellation. Takes effect at the session's next suspension
    /// point.
    pub fn cancel(&self) {
        self.tx.send_modify(|n| *n = n.wrapping_add(1));
    }
}

/// What woke the session up.
enum Wake {
    Cancelled,
    Timer,
    Inbound(Option<Result<Vec<u8>, TransportError>>),
}

/// Realtime session: one authenticated channel per logged-in user.
pub struct Session<T, E>
where
    T: Transport,
    E: Environment,
{
    env: E,
    transport: T,
    config: SessionConfig,
    lifecycle: Lifecycle<E::Instant>,
    router: EventRouter,
    rooms: RoomRegistry<E::Instant>,
    reconnect_at: Option<E::Instant>,
    canceller: Canceller,
    cancelled: watch::Receiver<u64>,
}

impl<T, E> Session<T, E>
where
    T: Transport,
    E: Environment,
{
    /// Create a disconnected session.
    pub fn new(transport: T, env: E, config: SessionConfig) -> Self {
        let (canceller, cancelled) = Canceller::new();
        Self {
            lifecycle: Lifecycle::new(config.lifecycle()),
            env,
            transport,
            config,
            router: EventRouter::new(),
            rooms: RoomRegistry::new(),
            reconnect_at: None,
            canceller,
            cancelled,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.lifecycle.state()
    }

    /// Number of successful handshakes so far.
    pub fn generation(&self) -> u64 {
        self.lifecycle.generation()
    }

    /// Server-assigned session ID while connected.
    pub fn session_id(&self) -> Option<&str> {
        self.lifecycle.session_id()
    }

    /// Why the last connection attempt failed, if it did.
    pub fn last_error(&self) -> Option<&LifecycleError> {
        self.lifecycle.last_error()
    }

    /// Remembered rooms.
    pub fn rooms(&self) -> &RoomRegistry<E::Instant> {
        &self.rooms
    }

    /// Configuration in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Environment driving this session.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Handle for cancelling connect and reconnect waits from another task.
    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Chat and call-signaling view of this session.
    pub fn relay(&mut self) -> Relay<'_, T, E> {
        Relay::new(self)
    }

    /// Register a handler for `event`. See [`EventRouter::on`].
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F) -> HandlerToken
    where
        F: FnMut(&Value) -> HandlerResult + Send + 'static,
    {
        self.router.on(event, handler)
    }

    /// Register a handler that is removed when the guard drops.
    pub fn subscribe<F>(&mut self, event: impl Into<String>, handler: F) -> Subscription
    where
        F: FnMut(&Value) -> HandlerResult + Send + 'static,
    {
        self.router.subscribe(event, handler)
    }

    /// Remove a handler. Unknown tokens are a no-op.
    pub fn off(&mut self, token: &HandlerToken) -> bool {
        self.router.off(token)
    }

    /// Invoke local handlers for `event` without touching the transport.
    pub fn emit_local(&mut self, event: &str, payload: &Value) -> EmitReport {
        self.router.emit_local(event, payload)
    }

    /// Handler registry.
    pub fn router_mut(&mut self) -> &mut EventRouter {
        &mut self.router
    }

    /// Connect and authenticate with `token`.
    ///
    /// Resolves once the handshake completed and remembered rooms were
    /// handed to the transport. A failed first attempt is not retried; the
    /// session ends in Disconnected.
    ///
    /// `Ok` means this call reached Connected. If a replayed join could not
    /// be written, the session is already Reconnecting when this returns and
    /// replays again on the next connection; check [`Session::state`].
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidToken` if the token is malformed (no I/O)
    /// - `SessionError::InvalidState` if not Disconnected
    /// - `SessionError::ConnectFailed` if the transport or handshake failed
    /// - `SessionError::Cancelled` if a [`Canceller`] fired
    pub async fn connect(&mut self, token: &str) -> Result<(), SessionError> {
        // Cancellations requested before this call do not apply to it
        drop(self.cancelled.borrow_and_update());

        let start = self.lifecycle.generation();
        let actions = self.lifecycle.connect(token, self.env.now())?;
        tracing::info!(endpoint = %self.config.endpoint, "connecting");
        self.execute(actions).await?;

        while self.lifecycle.state() == ConnectionState::Connecting {
            self.step().await?;
        }

        if self.lifecycle.generation() > start {
            return Ok(());
        }

        let error = self
            .lifecycle
            .last_error()
            .cloned()
            .unwrap_or_else(|| LifecycleError::Transport("connection closed".to_string()));
        tracing::warn!(error = %error, "connect failed");
        Err(SessionError::ConnectFailed(error))
    }

    /// Close the connection, forget all rooms, and stop reconnecting.
    ///
    /// Valid in every state, idempotent.
    pub async fn disconnect(&mut self) {
        let actions = self.stop();
        // Disconnect actions never open a transport, so they cannot be cancelled
        let _ = self.execute(actions).await;
    }

    fn stop(&mut self) -> Vec<LifecycleAction> {
        self.reconnect_at = None;
        self.rooms.clear();
        self.lifecycle.disconnect()
    }

    /// Wait for and process the next event: an inbound frame, a timer
    /// (heartbeat, timeout, reconnect), or cancellation.
    ///
    /// Returns immediately when Disconnected.
    ///
    /// # Errors
    ///
    /// - `SessionError::Cancelled` if a [`Canceller`] fired; the session is
    ///   Disconnected afterwards
    pub async fn step(&mut self) -> Result<(), SessionError> {
        let state = self.lifecycle.state();
        if state == ConnectionState::Disconnected {
            return Ok(());
        }

        let wait = self.next_wake().map(|deadline| {
            let now = self.env.now();
            if deadline > now { deadline - now } else { Duration::ZERO }
        });
        let listen = matches!(state, ConnectionState::Connecting | ConnectionState::Connected)
            && self.transport.is_open();

        let wake = {
            let env = &self.env;
            let transport = &mut self.transport;
            let cancelled = &mut self.cancelled;

            tokio::select! {
                biased;
                _ = cancelled.changed() => Wake::Cancelled,
                inbound = async move {
                    if listen { transport.recv().await } else { future::pending().await }
                } => Wake::Inbound(inbound),
                () = async move {
                    match wait {
                        Some(duration) => env.sleep(duration).await,
                        None => future::pending().await,
                    }
                } => Wake::Timer,
            }
        };

        match wake {
            Wake::Cancelled => {
                tracing::info!(state = ?self.lifecycle.state(), "cancelled");
                self.disconnect().await;
                Err(SessionError::Cancelled)
            },
            Wake::Timer => self.on_timer().await,
            Wake::Inbound(Some(Ok(bytes))) => self.on_inbound(&bytes).await,
            Wake::Inbound(Some(Err(e))) => self.on_transport_failure(&e).await,
            Wake::Inbound(None) => {
                self.on_transport_failure(&TransportError::Receive("closed by peer".to_string()))
                    .await
            },
        }
    }

    /// Process events until Disconnected.
    ///
    /// # Errors
    ///
    /// - `SessionError::Cancelled` if a [`Canceller`] fired
    pub async fn run(&mut self) -> Result<(), SessionError> {
        while self.lifecycle.state() != ConnectionState::Disconnected {
            self.step().await?;
        }
        Ok(())
    }

    /// Remember `room_id` and join it now if connected.
    ///
    /// Joining a remembered room again does nothing. If the join cannot be
    /// sent, it is replayed after the next successful reconnect.
    ///
    /// # Errors
    ///
    /// - `SessionError::Protocol` if the frame cannot be encoded
    pub async fn join(&mut self, room_id: &str) -> Result<(), SessionError> {
        if !self.rooms.join(room_id, self.env.now()) {
            return Ok(());
        }

        tracing::debug!(room_id, "room remembered");
        if self.lifecycle.state() != ConnectionState::Connected {
            return Ok(());
        }

        let frame = rooms::join_frame(room_id)?;
        match self.send_frame(frame).await {
            Err(SessionError::Transport(e)) => {
                tracing::warn!(room_id, error = %e, "join deferred until reconnect");
                Ok(())
            },
            other => other,
        }
    }

    /// Forget `room_id` and leave it now if connected.
    ///
    /// Unknown rooms are a no-op.
    ///
    /// # Errors
    ///
    /// - `SessionError::Protocol` if the frame cannot be encoded
    pub async fn leave(&mut self, room_id: &str) -> Result<(), SessionError> {
        if !self.rooms.leave(room_id) {
            return Ok(());
        }

        tracing::debug!(room_id, "room forgotten");
        if self.lifecycle.state() != ConnectionState::Connected {
            return Ok(());
        }

        let frame = rooms::leave_frame(room_id)?;
        match self.send_frame(frame).await {
            // Nothing to replay; the server drops membership with the connection
            Err(SessionError::Transport(_)) => Ok(()),
            other => other,
        }
    }

    /// Send an application event to the server.
    ///
    /// Resolves once the transport accepted the frame.
    ///
    /// # Errors
    ///
    /// - `SessionError::ReservedEvent` for session and room control events
    ///   and local-only events
    /// - `SessionError::NotConnected` unless Connected
    /// - `SessionError::Protocol` if the frame cannot be encoded
    /// - `SessionError::Transport` if the write failed (reconnect starts)
    pub async fn send(&mut self, event: &str, payload: Value) -> Result<(), SessionError> {
        if event::is_reserved(event) {
            return Err(SessionError::ReservedEvent(event.to_string()));
        }
        self.send_frame(Frame::new(event, payload)).await
    }

    /// Send a typed payload. See [`Session::send`].
    pub(crate) async fn send_payload(&mut self, payload: Payload) -> Result<(), SessionError> {
        self.ensure_connected()?;
        self.send_frame(payload.into_frame()?).await
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), SessionError> {
        self.ensure_connected()?;

        match self.write(&frame).await {
            Err(SessionError::Transport(e)) => {
                self.on_transport_failure(&e).await?;
                Err(SessionError::Transport(e))
            },
            other => other,
        }
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        match self.lifecycle.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(SessionError::NotConnected { state }),
        }
    }

    async fn write(&mut self, frame: &Frame) -> Result<(), SessionError> {
        let text = frame.encode()?;
        tracing::trace!(event = %frame.event, len = text.len(), "send");
        self.transport.send(text).await?;
        Ok(())
    }

    fn next_wake(&self) -> Option<E::Instant> {
        match self.lifecycle.state() {
            ConnectionState::Reconnecting => self.reconnect_at,
            _ => self.lifecycle.next_deadline(),
        }
    }

    async fn on_timer(&mut self) -> Result<(), SessionError> {
        if self.lifecycle.state() != ConnectionState::Reconnecting {
            let actions = self.lifecycle.tick(&self.env);
            return self.execute(actions).await;
        }

        let now = self.env.now();
        if self.reconnect_at.is_some_and(|at| now >= at) {
            self.reconnect_at = None;
            match self.lifecycle.reconnect(now) {
                Ok(actions) => return self.execute(actions).await,
                Err(e) => tracing::warn!(error = %e, "reconnect skipped"),
            }
        }
        Ok(())
    }

    async fn on_inbound(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let Some(frame) = decode_inbound(bytes) else {
            return Ok(());
        };
        tracing::trace!(event = %frame.event, "recv");

        if event::is_local_event(&frame.event) {
            tracing::warn!(event = %frame.event, "dropping inbound frame for a local-only event");
            return Ok(());
        }

        if event::is_session_event(&frame.event) {
            return match self.lifecycle.handle_frame(&frame, &self.env) {
                Ok(actions) => self.execute(actions).await,
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring session frame");
                    Ok(())
                },
            };
        }

        self.lifecycle.record_activity(self.env.now());
        if self.lifecycle.state() == ConnectionState::Connected {
            self.router.dispatch(&frame);
        } else {
            tracing::debug!(event = %frame.event, "dropping frame received before handshake");
        }
        Ok(())
    }

    async fn on_transport_failure(&mut self, error: &TransportError) -> Result<(), SessionError> {
        tracing::warn!(error = %error, state = ?self.lifecycle.state(), "transport failed");
        let actions = self.lifecycle.transport_failed(&error.to_string(), &self.env);
        self.execute(actions).await
    }

    /// Execute lifecycle actions in order.
    ///
    /// A transport failure invalidates the rest of the batch; it is replaced
    /// by whatever the lifecycle returns for the failure. A cancel while a
    /// transport is opening replaces it with a disconnect and fails with
    /// `SessionError::Cancelled` once that has run.
    async fn execute(&mut self, actions: Vec<LifecycleAction>) -> Result<(), SessionError> {
        let mut queue: VecDeque<LifecycleAction> = actions.into();
        let mut cancelled = false;

        while let Some(action) = queue.pop_front() {
            match action {
                LifecycleAction::EmitState(state) => self.emit_state(state),

                LifecycleAction::OpenTransport => {
                    self.reconnect_at = None;
                    self.transport.close().await;

                    match self.open_transport().await {
                        Ok(()) => match self.lifecycle.transport_opened() {
                            Ok(next) => prepend(&mut queue, next),
                            Err(e) => tracing::error!(error = %e, "handshake not started"),
                        },
                        Err(SessionError::Cancelled) => {
                            tracing::info!(state = ?self.lifecycle.state(), "cancelled during open");
                            cancelled = true;
                            queue = self.stop().into();
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "transport open failed");
                            queue = self.lifecycle.transport_failed(&e.to_string(), &self.env).into();
                        },
                    }
                },

                LifecycleAction::SendFrame(frame) => match self.write(&frame).await {
                    Ok(()) => {},
                    Err(SessionError::Transport(e)) => {
                        tracing::warn!(error = %e, event = %frame.event, "send failed");
                        queue = self.lifecycle.transport_failed(&e.to_string(), &self.env).into();
                    },
                    Err(e) => tracing::error!(error = %e, event = %frame.event, "frame not sent"),
                },

                LifecycleAction::ReplayRooms => match self.rooms.replay_frames() {
                    Ok(frames) => {
                        tracing::info!(rooms = frames.len(), "replaying room joins");
                        prepend(&mut queue, frames.into_iter().map(LifecycleAction::SendFrame));
                    },
                    Err(e) => tracing::error!(error = %e, "room replay failed"),
                },

                LifecycleAction::ScheduleReconnect { delay, attempt } => {
                    tracing::info!(attempt, ?delay, "reconnect scheduled");
                    self.reconnect_at = Some(self.env.now() + delay);
                },

                LifecycleAction::Close { reason } => {
                    tracing::debug!(%reason, "closing transport");
                    self.transport.close().await;
                },
            }
        }

        if cancelled { Err(SessionError::Cancelled) } else { Ok(()) }
    }

    async fn open_transport(&mut self) -> Result<(), SessionError> {
        let timeout = self.config.handshake_timeout;
        let endpoint = self.config.endpoint.as_str();
        let transport = &mut self.transport;
        let env = &self.env;
        let cancelled = &mut self.cancelled;

        tokio::select! {
            biased;
            _ = cancelled.changed() => Err(SessionError::Cancelled),
            result = transport.open(endpoint) => result.map_err(SessionError::from),
            () = env.sleep(timeout) => {
                Err(TransportError::Connect(format!("open timed out after {timeout:?}")).into())
            },
        }
    }

    fn emit_state(&mut self, state: ConnectionState) {
        let change = StateChange { state, generation: self.lifecycle.generation() };
        tracing::info!(?state, generation = change.generation, "connection state changed");

        match serde_json::to_value(change) {
            Ok(payload) => {
                self.router.emit_local(event::CONNECTION_STATE_CHANGED, &payload);
            },
            Err(e) => tracing::error!(error = %e, "state change not serializable"),
        }
    }
}

/// Push `actions` to the front of `queue`, keeping their order.
fn prepend<I>(queue: &mut VecDeque<LifecycleAction>, actions: I)
where
    I: IntoIterator<Item = LifecycleAction>,
    I::IntoIter: DoubleEndedIterator,
{
    for action in actions.into_iter().rev() {
        queue.push_front(action);
    }
}

impl<T, E> std::fmt::Debug for Session<T, E>
where
    T: Transport,
    E: Environment,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.config.endpoint)
            .field("state", &self.lifecycle.state())
            .field("generation", &self.lifecycle.generation())
            .field("rooms", &self.rooms.len())
            .finish_non_exhaustive()
    }
}
