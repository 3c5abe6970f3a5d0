//! Chat payloads.

use serde::{Deserialize, Serialize};

use crate::{RoomId, UserId};

/// Outbound chat message (`send-message`).
///
/// The server stamps sender and timestamp; the client only names the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Target room
    pub room_id: RoomId,
    /// Message text
    pub content: String,
    /// Broadcast title, for announcements sent to a whole cohort
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl OutgoingMessage {
    /// Plain message without a broadcast title.
    pub fn new(room_id: impl Into<RoomId>, content: impl Into<String>) -> Self {
        Self { room_id: room_id.into(), content: content.into(), title: None }
    }

    /// Attach a broadcast title.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Inbound chat message (`message-received`).
///
/// Immutable once created. Ownership passes to whoever subscribed; this
/// layer keeps no history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub sender_id: UserId,
    /// Room (or per-user inbox) the message was addressed to
    pub room_id: RoomId,
    /// Message text
    pub content: String,
    /// Creation time, Unix milliseconds (UTC)
    pub created_at: u64,
    /// Broadcast title, if this was an announcement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
