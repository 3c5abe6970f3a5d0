//! Room membership set with replay.
//!
//! Joining is idempotent and membership outlives the connection: after every
//! (re)connect the session replays a `join-room` for each remembered room, in
//! the order the rooms were first joined.

use tether_proto::{Frame, Payload, RoomId, RoomRequest};

/// One remembered room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMembership<I> {
    /// Room identifier
    pub room_id: RoomId,
    /// When the application first asked to join
    pub joined_at: I,
}

/// Ordered, duplicate-free set of rooms the application wants to be in.
#[derive(Debug, Clone)]
pub struct RoomRegistry<I> {
    rooms: Vec<RoomMembership<I>>,
}

impl<I> Default for RoomRegistry<I> {
    fn default() -> Self {
        Self { rooms: Vec::new() }
    }
}

impl<I: Copy> RoomRegistry<I> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `room_id`. Returns false if it was already present, in which
    /// case the original join time is kept.
    pub fn join(&mut self, room_id: &str, now: I) -> bool {
        if self.contains(room_id) {
            return false;
        }

        self.rooms.push(RoomMembership { room_id: room_id.to_string(), joined_at: now });
        true
    }

    /// Forget `room_id`. Returns false for rooms that were never joined.
    pub fn leave(&mut self, room_id: &str) -> bool {
        let before = self.rooms.len();
        self.rooms.retain(|m| m.room_id != room_id);
        self.rooms.len() != before
    }

    /// Whether `room_id` is remembered.
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.iter().any(|m| m.room_id == room_id)
    }

    /// Look up a membership.
    pub fn get(&self, room_id: &str) -> Option<&RoomMembership<I>> {
        self.rooms.iter().find(|m| m.room_id == room_id)
    }

    /// Memberships in join order.
    pub fn iter(&self) -> impl Iterator<Item = &RoomMembership<I>> {
        self.rooms.iter()
    }

    /// Room identifiers in join order.
    pub fn room_ids(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().map(|m| m.room_id.as_str())
    }

    /// Number of remembered rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no rooms are remembered.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Forget every room (explicit disconnect).
    pub fn clear(&mut self) {
        self.rooms.clear();
    }

    /// `join-room` frames for every remembered room, in join order.
    pub fn replay_frames(&self) -> tether_proto::Result<Vec<Frame>> {
        self.rooms.iter().map(|m| join_frame(&m.room_id)).collect()
    }
}

/// Build a `join-room` frame.
pub fn join_frame(room_id: &str) -> tether_proto::Result<Frame> {
    Payload::JoinRoom(RoomRequest { room_id: room_id.to_string() }).into_frame()
}

/// Build a `leave-room` frame.
pub fn leave_frame(room_id: &str) -> tether_proto::Result<Frame> {
    Payload::LeaveRoom(RoomRequest { room_id: room_id.to_string() }).into_frame()
}
