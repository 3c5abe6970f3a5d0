//! Room membership payloads.

use serde::{Deserialize, Serialize};

use crate::RoomId;

/// Body of `join-room` and `leave-room` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRequest {
    /// Room to join or leave
    pub room_id: RoomId,
}
