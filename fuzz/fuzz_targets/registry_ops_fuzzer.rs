//! Fuzz target for room registry operation sequences
//!
//! # Strategy
//!
//! Arbitrary join/leave/broadcast/drain sequences over a small id space, so
//! duplicates, foreign leaves and empty ids collide often.
//!
//! # Invariants
//!
//! - At most one session per (room, user)
//! - A room exists iff it has sessions
//! - No queue yields more events than its capacity between drains
//! - A left session's stream is disconnected once drained

#![no_main]

use std::collections::{BTreeMap, BTreeSet};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use roomcast_core::{
    EventStream, JoinRequest, ManualClock, Message, RegistryConfig, RegistryError, RoomRegistry,
    TryRecvError,
};

#[derive(Debug, Clone, Arbitrary)]
struct Scenario {
    buffer_size: u8,
    ops: Vec<Op>,
}

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Join { room: u8, user: u8 },
    Leave { room: u8, user: u8 },
    Broadcast { room: u8, user: u8, empty: bool },
    Drain { room: u8, user: u8 },
}

fn id(prefix: &str, raw: u8) -> String {
    // 0 maps to the empty id
    match raw % 4 {
        0 => String::new(),
        n => format!("{prefix}-{n}"),
    }
}

fuzz_target!(|scenario: Scenario| {
    let buffer_size = usize::from(scenario.buffer_size % 8) + 1;
    let registry =
        RoomRegistry::new(RegistryConfig { buffer_size }, ManualClock::at_millis(0));

    let mut model: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut streams: BTreeMap<(String, String), EventStream> = BTreeMap::new();
    let mut departed: Vec<EventStream> = Vec::new();

    for op in scenario.ops.into_iter().take(256) {
        match op {
            Op::Join { room, user } => {
                let (room, user) = (id("room", room), id("user", user));
                let result = registry.join(JoinRequest {
                    user_id: user.clone(),
                    display_name: String::new(),
                    room_id: room.clone(),
                });
                match result {
                    Ok((session, events)) => {
                        assert!(model.entry(room.clone()).or_default().insert(user.clone()));
                        assert_eq!(session.display_name, user);
                        streams.insert((room, user), events);
                    },
                    Err(RegistryError::EmptyFields) => assert!(room.is_empty() || user.is_empty()),
                    Err(RegistryError::AlreadyJoined { .. }) => {
                        assert!(model.get(&room).is_some_and(|m| m.contains(&user)));
                    },
                    Err(other) => panic!("unexpected join error: {other}"),
                }
            },
            Op::Leave { room, user } => {
                let (room, user) = (id("room", room), id("user", user));
                match registry.leave(&room, &user) {
                    Ok(()) => {
                        let members = model.get_mut(&room).expect("left room exists in model");
                        assert!(members.remove(&user));
                        if members.is_empty() {
                            model.remove(&room);
                        }
                        if let Some(events) = streams.remove(&(room, user)) {
                            departed.push(events);
                        }
                    },
                    Err(RegistryError::EmptyFields) => assert!(room.is_empty() || user.is_empty()),
                    Err(RegistryError::RoomNotFound(_)) => assert!(!model.contains_key(&room)),
                    Err(RegistryError::UserNotInRoom { .. }) => {
                        assert!(model.get(&room).is_some_and(|m| !m.contains(&user)));
                    },
                    Err(other) => panic!("unexpected leave error: {other}"),
                }
            },
            Op::Broadcast { room, user, empty } => {
                let (room, user) = (id("room", room), id("user", user));
                let content = if empty { String::new() } else { "fuzz".to_string() };
                let result = registry.broadcast(Message {
                    user_id: user.clone(),
                    room_id: room.clone(),
                    content,
                    sent_at: std::time::UNIX_EPOCH,
                });
                let is_member = model.get(&room).is_some_and(|m| m.contains(&user));
                let fields_ok = !room.is_empty() && !user.is_empty() && !empty;
                assert_eq!(result.is_ok(), is_member && fields_ok);
            },
            Op::Drain { room, user } => {
                let key = (id("room", room), id("user", user));
                if let Some(events) = streams.get_mut(&key) {
                    let drained = std::iter::from_fn(|| events.try_recv().ok()).count();
                    assert!(drained <= buffer_size);
                }
            },
        }

        assert_eq!(registry.room_count(), model.len());
        for (room, members) in &model {
            assert_eq!(registry.session_count(room), members.len());
        }
    }

    for mut events in departed {
        let drained = std::iter::from_fn(|| events.try_recv().ok()).count();
        assert!(drained <= buffer_size);
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Disconnected);
    }
});
