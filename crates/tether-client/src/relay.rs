//! Chat delivery and WebRTC call signaling over the session.
//!
//! Thin typed layer over [`Session`]: outbound calls build the matching
//! [`Payload`], inbound subscriptions decode the event payload before calling
//! the handler. Offer, answer and ICE payloads are relayed untouched, with no
//! deduplication or reordering.

use serde::Deserialize;
use tether_core::{Environment, Subscription};
use tether_proto::{
    ChatMessage, OutgoingMessage, Payload, SignalKind, SignalRequest, SignalingMessage, event,
};

use crate::{Session, SessionError, transport::Transport};

/// Borrowed chat/signaling view of a [`Session`].
pub struct Relay<'a, T, E>
where
    T: Transport,
    E: Environment,
{
    session: &'a mut Session<T, E>,
}

impl<'a, T, E> Relay<'a, T, E>
where
    T: Transport,
    E: Environment,
{
    pub(crate) fn new(session: &'a mut Session<T, E>) -> Self {
        Self { session }
    }

    /// Send a chat message.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotConnected` unless Connected
    /// - `SessionError::Transport` if the write failed
    pub async fn send_message(&mut self, message: OutgoingMessage) -> Result<(), SessionError> {
        tracing::debug!(room_id = %message.room_id, "send message");
        self.session.send_payload(Payload::SendMessage(message)).await
    }

    /// Subscribe to inbound chat messages, optionally for one room only.
    pub fn on_message<F>(&mut self, room_id: Option<&str>, mut handler: F) -> Subscription
    where
        F: FnMut(ChatMessage) + Send + 'static,
    {
        let room_id = room_id.map(str::to_string);
        self.session.subscribe(event::MESSAGE_RECEIVED, move |payload| {
            let message = ChatMessage::deserialize(payload)?;
            if room_id.as_deref().is_none_or(|room| room == message.room_id) {
                handler(message);
            }
            Ok(())
        })
    }

    /// Send a signaling message of `kind`.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotConnected` unless Connected
    /// - `SessionError::Transport` if the write failed
    pub async fn send_signal(
        &mut self,
        kind: SignalKind,
        request: SignalRequest,
    ) -> Result<(), SessionError> {
        tracing::debug!(
            ?kind,
            session_id = %request.session_id,
            target = %request.target_user_id,
            "send signal"
        );
        self.session.send_payload(Payload::Signal(kind, request)).await
    }

    /// Send an SDP offer.
    pub async fn send_offer(&mut self, request: SignalRequest) -> Result<(), SessionError> {
        self.send_signal(SignalKind::Offer, request).await
    }

    /// Send an SDP answer.
    pub async fn send_answer(&mut self, request: SignalRequest) -> Result<(), SessionError> {
        self.send_signal(SignalKind::Answer, request).await
    }

    /// Send a trickled ICE candidate.
    pub async fn send_ice_candidate(&mut self, request: SignalRequest) -> Result<(), SessionError> {
        self.send_signal(SignalKind::IceCandidate, request).await
    }

    /// Subscribe to inbound signaling messages of `kind`.
    pub fn on_signal<F>(&mut self, kind: SignalKind, mut handler: F) -> Subscription
    where
        F: FnMut(SignalingMessage) + Send + 'static,
    {
        self.session.subscribe(kind.inbound_event(), move |payload| {
            let mut message = SignalingMessage::deserialize(payload)?;
            message.kind = kind;
            handler(message);
            Ok(())
        })
    }

    /// Subscribe to inbound offers.
    pub fn on_offer<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(SignalingMessage) + Send + 'static,
    {
        self.on_signal(SignalKind::Offer, handler)
    }

    /// Subscribe to inbound answers.
    pub fn on_answer<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(SignalingMessage) + Send + 'static,
    {
        self.on_signal(SignalKind::Answer, handler)
    }

    /// Subscribe to inbound ICE candidates.
    pub fn on_ice_candidate<F>(&mut self, handler: F) -> Subscription
    where
        F: FnMut(SignalingMessage) + Send + 'static,
    {
        self.on_signal(SignalKind::IceCandidate, handler)
    }
}
