//! Property-based tests for RoomRegistry
//!
//! Random join/leave/broadcast sequences are applied to the registry and to a
//! plain set-based model; after every step the two must agree.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;
use roomcast_core::{
    EventKind, EventStream, JoinRequest, ManualClock, Message, RegistryConfig, RegistryError,
    RoomRegistry, TryRecvError,
};

#[derive(Debug, Clone)]
enum Op {
    Join { room: u8, user: u8 },
    Leave { room: u8, user: u8 },
    Broadcast { room: u8, user: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    // Small id spaces so sequences collide often
    let ids = (0u8..3, 0u8..4);
    prop_oneof![
        ids.clone().prop_map(|(room, user)| Op::Join { room, user }),
        ids.clone().prop_map(|(room, user)| Op::Leave { room, user }),
        ids.prop_map(|(room, user)| Op::Broadcast { room, user }),
    ]
}

fn room_id(room: u8) -> String {
    format!("room-{room}")
}

fn user_id(user: u8) -> String {
    format!("user-{user}")
}

fn new_registry(buffer_size: usize) -> RoomRegistry<ManualClock> {
    RoomRegistry::new(RegistryConfig { buffer_size }, ManualClock::at_millis(0))
}

fn drain(events: &mut EventStream) -> Vec<EventKind> {
    std::iter::from_fn(|| events.try_recv().ok()).map(|e| e.kind).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: registry membership always matches the set model, and a
    /// room exists exactly when it has sessions
    #[test]
    fn prop_membership_matches_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let registry = new_registry(128);
        let mut model: BTreeMap<u8, BTreeSet<u8>> = BTreeMap::new();
        let mut streams: BTreeMap<(u8, u8), EventStream> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Join { room, user } => {
                    let request = JoinRequest {
                        user_id: user_id(user),
                        display_name: String::new(),
                        room_id: room_id(room),
                    };
                    let result = registry.join(request);
                    let members = model.entry(room).or_default();
                    if members.insert(user) {
                        let (_, events) = result?;
                        streams.insert((room, user), events);
                    } else {
                        let already_joined =
                            matches!(result, Err(RegistryError::AlreadyJoined { .. }));
                        prop_assert!(already_joined);
                    }
                },
                Op::Leave { room, user } => {
                    let result = registry.leave(&room_id(room), &user_id(user));
                    match model.get_mut(&room) {
                        None => {
                            let expected = RegistryError::RoomNotFound(room_id(room));
                            prop_assert_eq!(result, Err(expected));
                        },
                        Some(members) if !members.contains(&user) => {
                            let not_in_room =
                                matches!(result, Err(RegistryError::UserNotInRoom { .. }));
                            prop_assert!(not_in_room);
                        },
                        Some(members) => {
                            prop_assert_eq!(result, Ok(()));
                            members.remove(&user);
                            streams.remove(&(room, user));
                        },
                    }
                },
                Op::Broadcast { room, user } => {
                    let message = Message {
                        user_id: user_id(user),
                        room_id: room_id(room),
                        content: "ping".to_string(),
                        sent_at: std::time::UNIX_EPOCH,
                    };
                    let result = registry.broadcast(message);
                    let is_member = model.get(&room).is_some_and(|members| members.contains(&user));
                    prop_assert_eq!(result.is_ok(), is_member);
                },
            }

            model.retain(|_, members| !members.is_empty());

            prop_assert_eq!(registry.room_count(), model.len());
            for room in 0u8..3 {
                let expected = model.get(&room).map_or(0, BTreeSet::len);
                prop_assert_eq!(registry.session_count(&room_id(room)), expected);
                prop_assert_eq!(registry.has_room(&room_id(room)), expected > 0);
            }
        }
    }

    /// Property: joining then leaving restores the previous registry shape
    #[test]
    fn prop_join_leave_symmetry(
        existing in prop::collection::btree_set(0u8..6, 0..5),
        newcomer in 6u8..10,
    ) {
        let registry = new_registry(16);
        let mut streams = Vec::new();
        for user in &existing {
            let request = JoinRequest {
                user_id: user_id(*user),
                display_name: String::new(),
                room_id: room_id(0),
            };
            streams.push(registry.join(request)?.1);
        }
        let rooms_before = registry.room_count();
        for events in &mut streams {
            drain(events);
        }

        let request = JoinRequest {
            user_id: user_id(newcomer),
            display_name: String::new(),
            room_id: room_id(0),
        };
        let (_, mut own) = registry.join(request)?;
        registry.leave(&room_id(0), &user_id(newcomer))?;

        prop_assert_eq!(registry.room_count(), rooms_before);
        prop_assert_eq!(registry.session_count(&room_id(0)), existing.len());
        prop_assert!(registry.session(&room_id(0), &user_id(newcomer)).is_none());

        // Previous members saw exactly one join and one leave
        for events in &mut streams {
            prop_assert_eq!(drain(events), vec![EventKind::UserJoined, EventKind::UserLeft]);
        }
        // The newcomer saw neither its own join nor its own leave
        prop_assert_eq!(own.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }

    /// Property: no queue ever holds more than its capacity
    #[test]
    fn prop_queue_never_exceeds_capacity(
        buffer_size in 1usize..8,
        messages in 0usize..40,
    ) {
        let registry = new_registry(buffer_size);
        let request = JoinRequest {
            user_id: user_id(0),
            display_name: String::new(),
            room_id: room_id(0),
        };
        let (_, mut events) = registry.join(request)?;

        for _ in 0..messages {
            let message = Message {
                user_id: user_id(0),
                room_id: room_id(0),
                content: "flood".to_string(),
                sent_at: std::time::UNIX_EPOCH,
            };
            registry.broadcast(message)?;
        }

        prop_assert_eq!(drain(&mut events).len(), messages.min(buffer_size));
    }
}
