//! Event translation.
//!
//! Pure mapping from registry events to outbound wire events. No I/O and no
//! state.

use roomcast_core::{Event, EventKind, Session, unix_millis};
use roomcast_proto::{ChatPayload, JoinAck, NoticeKind, ServerEvent, ServerNotice};

/// Wire form of a registry event.
pub fn event_to_wire(event: &Event) -> ServerEvent {
    match event.kind {
        EventKind::Message => ServerEvent::Broadcast(ChatPayload {
            user_id: event.user_id.clone(),
            room: event.room_id.clone(),
            content: event.content.clone(),
            timestamp_utc: Some(unix_millis(event.timestamp)),
        }),
        EventKind::UserJoined => {
            notice(event, NoticeKind::UserJoined, format!("{} joined the room", event.display_name))
        },
        EventKind::UserLeft => {
            notice(event, NoticeKind::UserLeft, format!("{} left the room", event.display_name))
        },
        EventKind::System => notice(event, NoticeKind::Generic, event.content.clone()),
    }
}

/// Acknowledgement sent once a join succeeds.
pub fn join_ack(session: &Session) -> ServerEvent {
    ServerEvent::Joined(JoinAck {
        user_id: session.user_id.clone(),
        room: session.room_id.clone(),
        welcome_message: format!("Welcome {}!", session.display_name),
    })
}

fn notice(event: &Event, kind: NoticeKind, message: String) -> ServerEvent {
    ServerEvent::Notice(ServerNotice {
        kind,
        message,
        user_id: event.user_id.clone(),
        room: event.room_id.clone(),
    })
}
