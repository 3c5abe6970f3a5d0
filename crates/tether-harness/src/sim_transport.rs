//! Scripted in-memory transport.
//!
//! `SimTransport` plays both sides: it is the client's [`Transport`] and, via
//! any clone of it, the test's handle on the "server". Frames the client
//! sends are recorded and answered by a [`ServerScript`] synchronously inside
//! `send`, so a scenario needs no server task.
//!
//! Fault injection:
//! - [`SimTransport::refuse_opens`]: next N `open` calls fail
//! - [`SimTransport::stall_opens`]: next N `open` calls never resolve
//! - [`SimTransport::fail_sends_after`]: connection breaks on a later `send`
//! - [`SimTransport::drop_connection`]: `recv` ends, `send` fails
//! - [`SimTransport::set_handshake`]: accept, reject, or ignore `hello`

use std::{
    collections::VecDeque,
    future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_client::{Transport, TransportError};
use tether_proto::{ErrorPayload, Frame, SignalKind, event};
use tokio::sync::Notify;

/// How the scripted server answers `hello`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// Reply with `hello-reply`
    Accept,
    /// Reply with an `error` frame
    Reject {
        /// Error code (401 for a bad token)
        code: u16,
        /// Error message
        message: String,
    },
    /// Never answer
    Silent,
}

/// Scripted server behavior.
#[derive(Debug, Clone)]
pub struct ServerScript {
    /// Answer to `hello`
    pub handshake: Handshake,
    /// Answer `ping` with `pong`
    pub answer_pings: bool,
    /// Echo chat and signaling back as the matching `*-received` event
    pub loopback: bool,
    /// User ID the server assigns (and stamps on loopback messages)
    pub user_id: String,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            handshake: Handshake::Accept,
            answer_pings: true,
            loopback: false,
            user_id: "user-1".to_string(),
        }
    }
}

/// Frame written by the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SentFrame {
    /// 1-based connection the frame was sent on
    pub connection: u64,
    /// The frame
    pub frame: Frame,
}

#[derive(Debug, Default)]
struct ServerState {
    script: ServerScript,
    open: bool,
    dropped: bool,
    connections: u64,
    closes: u64,
    refuse_opens: u32,
    stall_opens: u32,
    send_budget: Option<u32>,
    endpoints: Vec<String>,
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<SentFrame>,
    joined: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<ServerState>,
    inbound_ready: Notify,
}

/// In-memory transport with a scripted server. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimTransport {
    shared: Arc<Shared>,
}

impl SimTransport {
    /// Transport whose server accepts every handshake.
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport with a custom server script.
    pub fn with_script(script: ServerScript) -> Self {
        let transport = Self::new();
        transport.state().script = script;
        transport
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change how the server answers `hello` from now on.
    pub fn set_handshake(&self, handshake: Handshake) {
        self.state().script.handshake = handshake;
    }

    /// Enable or disable loopback of chat and signaling.
    pub fn set_loopback(&self, loopback: bool) {
        self.state().script.loopback = loopback;
    }

    /// Make the next `count` open attempts fail.
    pub fn refuse_opens(&self, count: u32) {
        self.state().refuse_opens = count;
    }

    /// Make the next `count` open attempts hang until the caller gives up.
    pub fn stall_opens(&self, count: u32) {
        self.state().stall_opens = count;
    }

    /// Accept `count` more sends, then break the connection on the next one.
    ///
    /// The budget is consumed across reconnects and cleared once it fires.
    pub fn fail_sends_after(&self, count: u32) {
        self.state().send_budget = Some(count);
    }

    /// Break the current connection as if the network went away.
    pub fn drop_connection(&self) {
        let mut state = self.state();
        if state.open {
            state.dropped = true;
        }
        drop(state);
        self.shared.inbound_ready.notify_one();
    }

    /// Queue an inbound frame.
    pub fn push_frame(&self, frame: &Frame) {
        match frame.encode() {
            Ok(text) => self.push_raw(text.into_bytes()),
            Err(e) => tracing::error!(error = %e, "scripted frame not encodable"),
        }
    }

    /// Queue raw inbound bytes (for malformed-frame tests).
    pub fn push_raw(&self, bytes: Vec<u8>) {
        self.state().inbound.push_back(bytes);
        self.shared.inbound_ready.notify_one();
    }

    /// Every frame the client sent, in order.
    pub fn sent(&self) -> Vec<SentFrame> {
        self.state().sent.clone()
    }

    /// Event names the client sent, in order.
    pub fn sent_events(&self) -> Vec<String> {
        self.state().sent.iter().map(|s| s.frame.event.clone()).collect()
    }

    /// Frames sent on connection `connection`.
    pub fn sent_on(&self, connection: u64) -> Vec<Frame> {
        self.state()
            .sent
            .iter()
            .filter(|s| s.connection == connection)
            .map(|s| s.frame.clone())
            .collect()
    }

    /// Forget recorded frames.
    pub fn clear_sent(&self) {
        self.state().sent.clear();
    }

    /// Number of successful opens.
    pub fn connections(&self) -> u64 {
        self.state().connections
    }

    /// Number of `close` calls that closed an open connection.
    pub fn closes(&self) -> u64 {
        self.state().closes
    }

    /// Endpoints passed to `open`, including refused attempts.
    pub fn endpoints(&self) -> Vec<String> {
        self.state().endpoints.clone()
    }

    /// Rooms joined on the current connection, in join order.
    pub fn joined_rooms(&self) -> Vec<String> {
        self.state().joined.clone()
    }

    /// Whether the connection is open and not dropped.
    pub fn is_live(&self) -> bool {
        let state = self.state();
        state.open && !state.dropped
    }
}

impl ServerState {
    fn accept_open(&mut self) -> Result<(), TransportError> {
        if self.refuse_opens > 0 {
            self.refuse_opens -= 1;
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        self.open = true;
        self.dropped = false;
        self.connections += 1;
        self.inbound.clear();
        self.joined.clear();
        Ok(())
    }

    /// Spend one send from the budget. False once the budget ran out.
    fn take_send(&mut self) -> bool {
        match self.send_budget {
            Some(0) => {
                self.send_budget = None;
                self.dropped = true;
                false
            },
            Some(n) => {
                self.send_budget = Some(n - 1);
                true
            },
            None => true,
        }
    }

    /// Record a client frame and queue the scripted reply.
    fn receive(&mut self, frame: Frame) {
        let reply = self.reply_to(&frame);
        self.sent.push(SentFrame { connection: self.connections, frame });

        if let Some(reply) = reply {
            match reply.encode() {
                Ok(text) => self.inbound.push_back(text.into_bytes()),
                Err(e) => tracing::error!(error = %e, "scripted reply not encodable"),
            }
        }
    }

    fn reply_to(&mut self, frame: &Frame) -> Option<Frame> {
        let script = &self.script;
        let user = script.user_id.clone();

        match frame.event.as_str() {
            event::HELLO => match &script.handshake {
                Handshake::Accept => Some(Frame::new(
                    event::HELLO_REPLY,
                    json!({ "session_id": format!("sess-{}", self.connections), "user_id": user }),
                )),
                Handshake::Reject { code, message } => {
                    let error =
                        ErrorPayload { code: *code, message: message.clone(), retry_after: None };
                    Frame::from_payload(event::ERROR, &error).ok()
                },
                Handshake::Silent => None,
            },
            event::PING if script.answer_pings => Some(Frame::empty(event::PONG)),
            event::JOIN_ROOM => {
                if let Some(room) = frame.payload["room_id"].as_str()
                    && !self.joined.iter().any(|r| r == room)
                {
                    self.joined.push(room.to_string());
                }
                None
            },
            event::LEAVE_ROOM => {
                if let Some(room) = frame.payload["room_id"].as_str() {
                    self.joined.retain(|r| r != room);
                }
                None
            },
            event::SEND_MESSAGE if script.loopback => {
                let mut message = frame.payload.clone();
                if let Value::Object(fields) = &mut message {
                    fields.insert("sender_id".to_string(), Value::from(user));
                    fields.insert("created_at".to_string(), Value::from(self.sent.len() as u64));
                }
                Some(Frame::new(event::MESSAGE_RECEIVED, message))
            },
            name if script.loopback => {
                let kind = SignalKind::from_outbound_event(name)?;
                let body = &frame.payload;
                Some(Frame::new(
                    kind.inbound_event(),
                    json!({
                        "session_id": body["session_id"],
                        "sender_id": user,
                        "target_user_id": body["target_user_id"],
                        "payload": body["payload"],
                    }),
                ))
            },
            _ => None,
        }
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn open(&mut self, endpoint: &str) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            state.endpoints.push(endpoint.to_string());
            if state.stall_opens == 0 {
                return state.accept_open();
            }
            state.stall_opens -= 1;
        }

        // Server never completes the upgrade
        future::pending().await
    }

    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.open || state.dropped || !state.take_send() {
            drop(state);
            self.shared.inbound_ready.notify_one();
            return Err(TransportError::Send("connection reset".to_string()));
        }

        match Frame::decode(text.as_bytes()) {
            Ok(frame) => state.receive(frame),
            Err(e) => tracing::warn!(error = %e, "client sent undecodable frame"),
        }

        let queued = !state.inbound.is_empty();
        drop(state);
        if queued {
            self.shared.inbound_ready.notify_one();
        }
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Vec<u8>, TransportError>> {
        loop {
            {
                let mut state = self.state();
                if !state.open {
                    return None;
                }
                if state.dropped {
                    state.open = false;
                    state.dropped = false;
                    return None;
                }
                if let Some(bytes) = state.inbound.pop_front() {
                    return Some(Ok(bytes));
                }
            }

            self.shared.inbound_ready.notified().await;
        }
    }

    async fn close(&mut self) {
        let mut state = self.state();
        if state.open {
            state.closes += 1;
        }
        state.open = false;
        state.dropped = false;
        state.inbound.clear();
    }

    fn is_open(&self) -> bool {
        self.state().open
    }
}
