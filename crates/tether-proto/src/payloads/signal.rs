//! WebRTC call-signaling payloads.
//!
//! The SDP / ICE payload is carried as an opaque JSON value. This layer never
//! inspects it; the peer-connection collaborator owns its meaning.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{UserId, event};

/// Kind of signaling message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    /// SDP offer
    #[default]
    Offer,
    /// SDP answer
    Answer,
    /// Trickled ICE candidate
    IceCandidate,
}

impl SignalKind {
    /// All kinds, in handshake order.
    pub const ALL: [Self; 3] = [Self::Offer, Self::Answer, Self::IceCandidate];

    /// Event name used when sending this kind.
    #[must_use]
    pub const fn outbound_event(self) -> &'static str {
        match self {
            Self::Offer => event::OFFER,
            Self::Answer => event::ANSWER,
            Self::IceCandidate => event::ICE_CANDIDATE,
        }
    }

    /// Event name used when receiving this kind.
    #[must_use]
    pub const fn inbound_event(self) -> &'static str {
        match self {
            Self::Offer => event::OFFER_RECEIVED,
            Self::Answer => event::ANSWER_RECEIVED,
            Self::IceCandidate => event::ICE_CANDIDATE_RECEIVED,
        }
    }

    /// Kind whose inbound event is `name`, if any.
    #[must_use]
    pub fn from_inbound_event(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.inbound_event() == name)
    }

    /// Kind whose outbound event is `name`, if any.
    #[must_use]
    pub fn from_outbound_event(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.outbound_event() == name)
    }
}

/// Body of outbound `offer` / `answer` / `ice-candidate` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRequest {
    /// Call session this message belongs to
    pub session_id: String,
    /// Peer the message is addressed to
    pub target_user_id: UserId,
    /// SDP or ICE candidate data
    pub payload: Value,
}

/// Inbound signaling message.
///
/// `kind` is not part of the wire body; it is derived from the event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingMessage {
    /// Offer, answer, or ICE candidate
    #[serde(skip)]
    pub kind: SignalKind,
    /// Call session this message belongs to
    pub session_id: String,
    /// Peer that sent the message
    pub sender_id: UserId,
    /// Recipient (this user); empty if the server omits it
    #[serde(default)]
    pub target_user_id: UserId,
    /// SDP or ICE candidate data
    pub payload: Value,
}
