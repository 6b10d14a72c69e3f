//! Roomcast client transport.
//!
//! [`connect`] opens a QUIC connection and the chat stream, then bridges it to
//! a pair of channels: requests go into [`ConnectedClient::to_server`], server
//! events come out of [`ConnectedClient::from_server`]. Two background tasks
//! do the framed I/O.
//!
//! There is no chat UI here; callers drive the channels themselves.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod transport;

pub use transport::{
    CloseStatus, ConnectedClient, TransportConfig, TransportError, connect, connect_with_config,
};
