//! Room registry.
//!
//! Maps room id → room state. A room holds two maps keyed by user id with the
//! same key set: `sessions` (membership) and `subscribers` (the sending half of
//! that member's bounded event queue).
//!
//! # Invariants
//!
//! - A room exists iff it has at least one session. The first join creates
//!   it, the last leave deletes it, so a rejoin starts from a fresh room.
//! - At most one session per (room, user).
//! - Queues are written only by the registry and never grow past
//!   `buffer_size`; a full queue drops the event for that subscriber.
//!
//! # Locking
//!
//! One registry-wide `RwLock`. `join`/`leave` hold the write lock for the
//! whole mutation, including the presence fan-out (which is non-blocking).
//! `broadcast` holds the read lock only to validate the sender, build the
//! event and snapshot the subscriber handles; the sends happen after the
//! lock is released.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::mpsc::{self, error::TrySendError};
pub use tokio::sync::mpsc::error::TryRecvError;

use crate::{
    clock::Clock,
    error::RegistryError,
    model::{Event, EventKind, JoinRequest, Message, Session},
};

/// Default per-subscriber queue capacity.
pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// Registry construction parameters.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of each subscriber's event queue. Zero selects the default
    pub buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { buffer_size: DEFAULT_BUFFER_SIZE }
    }
}

/// State of a single room.
#[derive(Debug, Default)]
struct Room {
    /// User id → session
    sessions: HashMap<String, Session>,
    /// User id → sending half of that user's event queue
    subscribers: HashMap<String, mpsc::Sender<Event>>,
}

impl Room {
    /// Deliver `event` to every subscriber except `exclude`.
    fn fan_out(&self, event: &Event, exclude: Option<&str>) {
        for (user_id, sender) in &self.subscribers {
            if Some(user_id.as_str()) != exclude {
                try_deliver(sender, event);
            }
        }
    }
}

/// Non-blocking, best-effort delivery into one queue.
fn try_deliver(sender: &mpsc::Sender<Event>, event: &Event) {
    match sender.try_send(event.clone()) {
        Ok(()) => {},
        Err(TrySendError::Full(dropped)) => {
            tracing::trace!(
                room = %dropped.room_id,
                kind = ?dropped.kind,
                "subscriber queue full, event dropped"
            );
        },
        Err(TrySendError::Closed(dropped)) => {
            tracing::trace!(
                room = %dropped.room_id,
                kind = ?dropped.kind,
                "subscriber gone, event dropped"
            );
        },
    }
}

/// Receive-only handle to a subscriber's event queue.
///
/// The stream ends (yields `None`) once the session is removed from the
/// registry and every already-queued event has been read.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::Receiver<Event>,
}

impl EventStream {
    /// Wait for the next event. `None` means the session was left.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Take the next event if one is queued.
    ///
    /// # Errors
    ///
    /// - `TryRecvError::Empty` if nothing is queued
    /// - `TryRecvError::Disconnected` if the session was left and the queue
    ///   is drained
    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// In-memory registry of rooms, sessions and subscriber queues.
///
/// Shared by all connection controllers (typically behind an `Arc`).
pub struct RoomRegistry<C> {
    rooms: RwLock<HashMap<String, Room>>,
    clock: C,
    buffer_size: usize,
}

impl<C: Clock> RoomRegistry<C> {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig, clock: C) -> Self {
        let buffer_size =
            if config.buffer_size == 0 { DEFAULT_BUFFER_SIZE } else { config.buffer_size };
        Self { rooms: RwLock::new(HashMap::new()), clock, buffer_size }
    }

    /// Clock used to stamp sessions and events.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Capacity of each subscriber queue.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Add a session for `request.user_id` in `request.room_id`.
    ///
    /// Creates the room if needed and notifies every *other* member with a
    /// `UserJoined` event. The joiner does not receive its own notice.
    ///
    /// # Errors
    ///
    /// - `RegistryError::EmptyFields` if room or user id is empty
    /// - `RegistryError::AlreadyJoined` if the user already has a session
    pub fn join(&self, request: JoinRequest) -> Result<(Session, EventStream), RegistryError> {
        if request.room_id.is_empty() || request.user_id.is_empty() {
            return Err(RegistryError::EmptyFields);
        }

        let display_name = if request.display_name.is_empty() {
            request.user_id.clone()
        } else {
            request.display_name
        };

        let mut rooms = self.write_rooms();
        let room = rooms.entry(request.room_id.clone()).or_default();

        if room.sessions.contains_key(&request.user_id) {
            return Err(RegistryError::AlreadyJoined {
                room_id: request.room_id,
                user_id: request.user_id,
            });
        }

        let session = Session {
            user_id: request.user_id,
            display_name,
            room_id: request.room_id,
            joined_at: self.clock.now(),
        };

        let (sender, receiver) = mpsc::channel(self.buffer_size);
        room.sessions.insert(session.user_id.clone(), session.clone());
        room.subscribers.insert(session.user_id.clone(), sender);

        let notice = Event::presence(EventKind::UserJoined, &session, session.joined_at);
        room.fan_out(&notice, Some(&session.user_id));

        tracing::debug!(room = %session.room_id, user = %session.user_id, "session joined");

        Ok((session, EventStream { receiver }))
    }

    /// Remove the user's session from the room.
    ///
    /// Closes the user's event queue, notifies the remaining members with a
    /// `UserLeft` event and deletes the room if it became empty.
    ///
    /// # Errors
    ///
    /// - `RegistryError::EmptyFields` if room or user id is empty
    /// - `RegistryError::RoomNotFound` if the room does not exist
    /// - `RegistryError::UserNotInRoom` if the user has no session there
    pub fn leave(&self, room_id: &str, user_id: &str) -> Result<(), RegistryError> {
        if room_id.is_empty() || user_id.is_empty() {
            return Err(RegistryError::EmptyFields);
        }

        let mut rooms = self.write_rooms();
        let room =
            rooms.get_mut(room_id).ok_or_else(|| RegistryError::RoomNotFound(room_id.to_string()))?;

        let session = room.sessions.remove(user_id).ok_or_else(|| RegistryError::UserNotInRoom {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        })?;

        // Dropping the only sender ends the member's stream once drained
        room.subscribers.remove(user_id);

        let notice = Event::presence(EventKind::UserLeft, &session, self.clock.now());
        room.fan_out(&notice, None);

        let now_empty = room.sessions.is_empty();
        if now_empty {
            rooms.remove(room_id);
        }

        tracing::debug!(room = %room_id, user = %user_id, room_closed = now_empty, "session left");

        Ok(())
    }

    /// Deliver a chat message to every member of the room, sender included.
    ///
    /// The event carries the sender's recorded display name and a server
    /// timestamp; `message.sent_at` is not used for ordering or display.
    ///
    /// # Errors
    ///
    /// - `RegistryError::EmptyFields` if room or user id is empty
    /// - `RegistryError::EmptyMessage` if content is empty
    /// - `RegistryError::RoomNotFound` if the room does not exist
    /// - `RegistryError::UserNotInRoom` if the sender has no session there
    pub fn broadcast(&self, message: Message) -> Result<(), RegistryError> {
        if message.room_id.is_empty() || message.user_id.is_empty() {
            return Err(RegistryError::EmptyFields);
        }
        if message.content.is_empty() {
            return Err(RegistryError::EmptyMessage);
        }

        let (event, subscribers) = {
            let rooms = self.read_rooms();
            let room = rooms
                .get(&message.room_id)
                .ok_or_else(|| RegistryError::RoomNotFound(message.room_id.clone()))?;

            let sender = room.sessions.get(&message.user_id).ok_or_else(|| {
                RegistryError::UserNotInRoom {
                    room_id: message.room_id.clone(),
                    user_id: message.user_id.clone(),
                }
            })?;

            let event = Event {
                kind: EventKind::Message,
                user_id: sender.user_id.clone(),
                display_name: sender.display_name.clone(),
                room_id: sender.room_id.clone(),
                content: message.content,
                timestamp: self.clock.now(),
            };

            let subscribers: Vec<mpsc::Sender<Event>> =
                room.subscribers.values().cloned().collect();
            (event, subscribers)
        };

        for sender in &subscribers {
            try_deliver(sender, &event);
        }

        Ok(())
    }

    /// Check if a room exists.
    pub fn has_room(&self, room_id: &str) -> bool {
        self.read_rooms().contains_key(room_id)
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.read_rooms().len()
    }

    /// Number of sessions in a room (0 if it does not exist).
    pub fn session_count(&self, room_id: &str) -> usize {
        self.read_rooms().get(room_id).map_or(0, |room| room.sessions.len())
    }

    /// The user's session in a room, if any.
    pub fn session(&self, room_id: &str, user_id: &str) -> Option<Session> {
        self.read_rooms().get(room_id).and_then(|room| room.sessions.get(user_id).cloned())
    }

    // Every mutation completes or fails before any state changes, so a
    // panic in another holder cannot leave the maps half-updated.
    fn read_rooms(&self) -> RwLockReadGuard<'_, HashMap<String, Room>> {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rooms(&self) -> RwLockWriteGuard<'_, HashMap<String, Room>> {
        self.rooms.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::*;

    struct FixedClock(SystemTime);

    impl Clock for FixedClock {
        fn now(&self) -> SystemTime {
            self.0
        }
    }

    fn registry(buffer_size: usize) -> RoomRegistry<FixedClock> {
        let clock = FixedClock(UNIX_EPOCH + Duration::from_secs(1_720_623_600));
        RoomRegistry::new(RegistryConfig { buffer_size }, clock)
    }

    fn join_request(user: &str, room: &str) -> JoinRequest {
        JoinRequest {
            user_id: user.to_string(),
            display_name: String::new(),
            room_id: room.to_string(),
        }
    }

    fn message(user: &str, room: &str, content: &str) -> Message {
        Message {
            user_id: user.to_string(),
            room_id: room.to_string(),
            content: content.to_string(),
            sent_at: UNIX_EPOCH,
        }
    }

    #[test]
    fn join_creates_session_with_defaults() {
        let registry = registry(4);

        let (session, _events) = registry.join(join_request("alice", "room-1")).unwrap();

        assert_eq!(session.user_id, "alice");
        assert_eq!(session.display_name, "alice");
        assert_eq!(session.room_id, "room-1");
        assert_eq!(session.joined_at, registry.clock().now());
        assert!(registry.has_room("room-1"));
        assert_eq!(registry.session("room-1", "alice"), Some(session));
    }

    #[test]
    fn join_keeps_explicit_display_name() {
        let registry = registry(4);
        let request = JoinRequest {
            user_id: "alice".to_string(),
            display_name: "Alice".to_string(),
            room_id: "room-1".to_string(),
        };

        let (session, _events) = registry.join(request).unwrap();
        assert_eq!(session.display_name, "Alice");
    }

    #[test]
    fn join_rejects_empty_fields() {
        let registry = registry(4);

        let no_user = registry.join(join_request("", "room-1")).unwrap_err();
        assert_eq!(no_user, RegistryError::EmptyFields);
        let no_room = registry.join(join_request("alice", "")).unwrap_err();
        assert_eq!(no_room, RegistryError::EmptyFields);
        assert_eq!(registry.room_count(), 0);
    }

    #[test]
    fn duplicate_join_fails() {
        let registry = registry(4);
        let _first = registry.join(join_request("alice", "room-1")).unwrap();

        let err = registry.join(join_request("alice", "room-1")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyJoined { .. }));
        assert_eq!(registry.session_count("room-1"), 1);
    }

    #[test]
    fn same_user_may_join_different_rooms() {
        let registry = registry(4);
        let _a = registry.join(join_request("alice", "room-1")).unwrap();
        let _b = registry.join(join_request("alice", "room-2")).unwrap();

        assert_eq!(registry.room_count(), 2);
    }

    #[test]
    fn leave_unknown_room_or_user_fails() {
        let registry = registry(4);

        assert_eq!(
            registry.leave("nowhere", "alice").unwrap_err(),
            RegistryError::RoomNotFound("nowhere".to_string())
        );

        let _alice = registry.join(join_request("alice", "room-1")).unwrap();
        assert!(matches!(
            registry.leave("room-1", "bob").unwrap_err(),
            RegistryError::UserNotInRoom { .. }
        ));
    }

    #[test]
    fn leave_closes_queue_after_draining() {
        let registry = registry(4);
        let (_alice, mut alice_events) = registry.join(join_request("alice", "room-1")).unwrap();
        let (_bob, _bob_events) = registry.join(join_request("bob", "room-1")).unwrap();

        registry.leave("room-1", "alice").unwrap();

        let joined = alice_events.try_recv().unwrap();
        assert_eq!(joined.kind, EventKind::UserJoined);
        assert_eq!(alice_events.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    #[test]
    fn broadcast_validates_before_lookup() {
        let registry = registry(4);

        let no_user = registry.broadcast(message("", "room-1", "hi"));
        assert_eq!(no_user, Err(RegistryError::EmptyFields));
        let no_content = registry.broadcast(message("alice", "room-1", ""));
        assert_eq!(no_content, Err(RegistryError::EmptyMessage));
        assert_eq!(
            registry.broadcast(message("alice", "room-1", "hi")),
            Err(RegistryError::RoomNotFound("room-1".to_string()))
        );
    }

    #[test]
    fn broadcast_from_non_member_fails() {
        let registry = registry(4);
        let (_alice, mut alice_events) = registry.join(join_request("alice", "room-1")).unwrap();

        let err = registry.broadcast(message("mallory", "room-1", "hi")).unwrap_err();
        assert!(matches!(err, RegistryError::UserNotInRoom { .. }));
        assert_eq!(alice_events.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[test]
    fn broadcast_uses_recorded_display_name_and_server_time() {
        let registry = registry(4);
        let request = JoinRequest {
            user_id: "alice".to_string(),
            display_name: "Alice".to_string(),
            room_id: "room-1".to_string(),
        };
        let (_alice, mut events) = registry.join(request).unwrap();

        registry.broadcast(message("alice", "room-1", "hello world")).unwrap();

        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, EventKind::Message);
        assert_eq!(event.display_name, "Alice");
        assert_eq!(event.content, "hello world");
        assert_eq!(event.timestamp, registry.clock().now());
    }

    #[test]
    fn zero_buffer_size_selects_default() {
        let registry = registry(0);
        assert_eq!(registry.buffer_size(), DEFAULT_BUFFER_SIZE);
    }
}
