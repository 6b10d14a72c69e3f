//! Roomcast wire protocol.
//!
//! Message types exchanged over the chat channel and the framing used to carry
//! them. A client opens one bidirectional stream per connection; every message
//! on that stream is a length-prefixed CBOR body:
//!
//! ```text
//! ┌────────────────────┬──────────────────────────────┐
//! │ length: u32 (BE)   │ body: CBOR (length bytes)    │
//! └────────────────────┴──────────────────────────────┘
//! ```
//!
//! Inbound (client to server) bodies are [`ClientEnvelope`]s, outbound bodies
//! are [`ServerEvent`]s. When the server terminates a channel because a
//! request was rejected, it closes the connection with an application code
//! taken from [`ErrorCategory::code`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
mod errors;
pub mod messages;
mod status;

pub use codec::{FrameReader, MAX_FRAME_SIZE, read_frame, read_message, write_frame};
pub use errors::{ProtocolError, Result};
pub use messages::{
    ChatPayload, ClientEnvelope, ClientMessage, JoinAck, JoinRequest, LeaveRequest, NoticeKind,
    ServerEvent, ServerNotice,
};
pub use status::ErrorCategory;

/// ALPN identifier negotiated during the QUIC handshake.
pub const ALPN_PROTOCOL: &[u8] = b"roomcast";
