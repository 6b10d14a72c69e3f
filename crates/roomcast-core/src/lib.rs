//! Roomcast core: the room broadcast engine.
//!
//! [`RoomRegistry`] owns every room, every active [`Session`], and the bounded
//! event queue of each subscriber. It is a single shared aggregate, handed to
//! connection controllers by reference; nothing here performs I/O.
//!
//! # Components
//!
//! - [`RoomRegistry`]: join/leave/broadcast under one registry-wide lock
//! - [`EventStream`]: receive-only handle to one subscriber's queue
//! - [`Clock`]: wall-clock abstraction so timestamps are injectable in tests
//!
//! # Delivery
//!
//! Delivery into subscriber queues never blocks. A full queue drops the event
//! for that subscriber only; consumers must tolerate gaps.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
mod error;
pub mod model;
mod registry;

pub use clock::{Clock, ManualClock, from_unix_millis, unix_millis};
pub use error::RegistryError;
pub use model::{Event, EventKind, JoinRequest, Message, Session};
pub use registry::{DEFAULT_BUFFER_SIZE, EventStream, RegistryConfig, RoomRegistry, TryRecvError};
