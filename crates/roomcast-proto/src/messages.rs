//! Inbound request and outbound event unions.
//!
//! These are the already-decoded shapes the session layer works with. All
//! identifiers are opaque strings; empty strings are representable on the
//! wire and rejected by the server, not by the decoder.

use serde::{Deserialize, Serialize};

/// Envelope for every client-to-server message.
///
/// `message` is optional on the wire so that an envelope from a newer or
/// broken client with an unknown (or no) request still decodes. The server
/// treats `None` as an invalid payload.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientEnvelope {
    /// The request carried by this envelope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ClientMessage>,
}

impl ClientEnvelope {
    /// Envelope carrying a join request.
    pub fn join(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        room: impl Into<String>,
    ) -> Self {
        Self::from(ClientMessage::Join(JoinRequest {
            user_id: user_id.into(),
            display_name: display_name.into(),
            room: room.into(),
        }))
    }

    /// Envelope carrying a chat message without a client timestamp.
    pub fn chat(
        user_id: impl Into<String>,
        room: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::from(ClientMessage::Chat(ChatPayload {
            user_id: user_id.into(),
            room: room.into(),
            content: content.into(),
            timestamp_utc: None,
        }))
    }

    /// Envelope carrying a leave request.
    pub fn leave(user_id: impl Into<String>, room: impl Into<String>) -> Self {
        let request = LeaveRequest { user_id: user_id.into(), room: room.into() };
        Self::from(ClientMessage::Leave(request))
    }
}

impl From<ClientMessage> for ClientEnvelope {
    fn from(message: ClientMessage) -> Self {
        Self { message: Some(message) }
    }
}

/// Client requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room, creating it if needed
    Join(JoinRequest),
    /// Send a chat message to the joined room
    Chat(ChatPayload),
    /// Leave the joined room and end the channel
    Leave(LeaveRequest),
}

/// Request to join a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Unique user identifier within the room
    pub user_id: String,
    /// Name shown to other participants. Empty means "use `user_id`"
    #[serde(default)]
    pub display_name: String,
    /// Room identifier
    pub room: String,
}

/// Chat message, used in both directions.
///
/// Inbound it is a client's chat request; outbound it is the broadcast every
/// room member receives, with `timestamp_utc` set by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPayload {
    /// Sender
    pub user_id: String,
    /// Room the message belongs to
    pub room: String,
    /// Message text
    pub content: String,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_utc: Option<i64>,
}

/// Request to leave a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    /// User leaving
    pub user_id: String,
    /// Room being left
    pub room: String,
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerEvent {
    /// Join acknowledgement, always the first event on a channel
    Joined(JoinAck),
    /// Chat message broadcast to the room
    Broadcast(ChatPayload),
    /// Presence or system notice
    Notice(ServerNotice),
}

impl ServerEvent {
    /// The join acknowledgement, if this is one.
    pub fn as_joined(&self) -> Option<&JoinAck> {
        match self {
            Self::Joined(ack) => Some(ack),
            _ => None,
        }
    }

    /// The broadcast payload, if this is one.
    pub fn as_broadcast(&self) -> Option<&ChatPayload> {
        match self {
            Self::Broadcast(payload) => Some(payload),
            _ => None,
        }
    }

    /// The notice, if this is one.
    pub fn as_notice(&self) -> Option<&ServerNotice> {
        match self {
            Self::Notice(notice) => Some(notice),
            _ => None,
        }
    }
}

/// Acknowledges a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinAck {
    /// Joined user
    pub user_id: String,
    /// Joined room
    pub room: String,
    /// Greeting addressed to the user's display name
    pub welcome_message: String,
}

/// Notice kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Free-form system notice
    Generic,
    /// Another participant joined
    UserJoined,
    /// A participant left
    UserLeft,
    /// Error notice
    Error,
}

/// Presence or system notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerNotice {
    /// What the notice is about
    pub kind: NoticeKind,
    /// Human-readable text
    pub message: String,
    /// User the notice concerns
    pub user_id: String,
    /// Room the notice concerns
    pub room: String,
}
