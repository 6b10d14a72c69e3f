//! Registry error types.

use thiserror::Error;

/// Errors returned by [`RoomRegistry`](crate::RoomRegistry) operations.
///
/// None of these are retried internally. A failed operation leaves registry
/// state untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Room or user identifier missing
    #[error("request missing required fields")]
    EmptyFields,

    /// Chat content is empty
    #[error("message content is empty")]
    EmptyMessage,

    /// User already has a session in the room.
    ///
    /// Concerns duplicate users across connections; a second join on the
    /// same connection is rejected earlier by the session controller.
    #[error("user {user_id} already joined room {room_id}")]
    AlreadyJoined {
        /// Target room
        room_id: String,
        /// Duplicate user
        user_id: String,
    },

    /// Room does not exist (it has no sessions)
    #[error("room not found: {0}")]
    RoomNotFound(String),

    /// User has no session in the room
    #[error("user {user_id} is not part of room {room_id}")]
    UserNotInRoom {
        /// Target room
        room_id: String,
        /// Missing user
        user_id: String,
    },
}
