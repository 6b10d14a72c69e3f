//! Domain entities.

use std::time::SystemTime;

/// A user asking to join a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// User identifier, unique within the room
    pub user_id: String,
    /// Display name. Empty falls back to `user_id`
    pub display_name: String,
    /// Room identifier
    pub room_id: String,
}

/// One active membership of a user in a room.
///
/// Sessions are never mutated; leaving removes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Member
    pub user_id: String,
    /// Resolved display name (never empty)
    pub display_name: String,
    /// Room the session belongs to
    pub room_id: String,
    /// When the registry accepted the join
    pub joined_at: SystemTime,
}

/// A chat message submitted for broadcast. Not stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender
    pub user_id: String,
    /// Target room
    pub room_id: String,
    /// Message text, must not be empty
    pub content: String,
    /// Time the client reports having sent the message
    pub sent_at: SystemTime,
}

/// Event kinds delivered to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Chat message broadcast
    Message,
    /// Someone joined the room
    UserJoined,
    /// Someone left the room
    UserLeft,
    /// Generic notice
    System,
}

/// Unit of delivery to a subscriber queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// User the event is about (the sender, for messages)
    pub user_id: String,
    /// That user's display name
    pub display_name: String,
    /// Room the event belongs to
    pub room_id: String,
    /// Message text; empty for presence events
    pub content: String,
    /// Server time the event was produced
    pub timestamp: SystemTime,
}

impl Event {
    /// Presence event (`UserJoined` / `UserLeft`) for `session`.
    pub(crate) fn presence(kind: EventKind, session: &Session, timestamp: SystemTime) -> Self {
        Self {
            kind,
            user_id: session.user_id.clone(),
            display_name: session.display_name.clone(),
            room_id: session.room_id.clone(),
            content: String::new(),
            timestamp,
        }
    }
}
