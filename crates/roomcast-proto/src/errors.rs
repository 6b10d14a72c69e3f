//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while framing or (de)serializing wire messages.
///
/// String payloads keep the type `Clone + Eq` so errors can be compared in
/// tests and carried across task boundaries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Length prefix announced a zero-length body
    #[error("empty frame")]
    EmptyFrame,

    /// Frame body exceeds the configured maximum
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Announced or actual body size
        size: usize,
        /// Maximum accepted body size
        max: usize,
    },

    /// Stream ended in the middle of a frame
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required to complete the frame
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// CBOR serialization failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// Peer reset or closed the connection
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// Underlying stream I/O failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl ProtocolError {
    /// Returns true if the error was caused by the peer's bytes (as opposed
    /// to our own stream failing).
    ///
    /// Malformed input is reported to the peer as an invalid payload; I/O
    /// failures just end the stream.
    pub fn is_malformed_input(&self) -> bool {
        matches!(
            self,
            Self::EmptyFrame
                | Self::FrameTooLarge { .. }
                | Self::Truncated { .. }
                | Self::CborDecode(_)
        )
    }

    /// Returns true if the peer went away rather than the stream failing.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe => Self::Disconnected(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_sizes() {
        let err = ProtocolError::FrameTooLarge { size: 10, max: 4 };
        assert_eq!(err.to_string(), "frame too large: 10 bytes (max 4)");

        let err = ProtocolError::Truncated { expected: 8, actual: 3 };
        assert_eq!(err.to_string(), "truncated frame: expected 8 bytes, got 3");
    }

    #[test]
    fn io_errors_are_not_malformed_input() {
        assert!(!ProtocolError::Io("reset".to_string()).is_malformed_input());
        assert!(ProtocolError::CborDecode("bad".to_string()).is_malformed_input());
        assert!(ProtocolError::EmptyFrame.is_malformed_input());
    }

    #[test]
    fn reset_and_lost_connections_are_disconnects() {
        use std::io::{Error, ErrorKind};

        let reset = ProtocolError::from(Error::new(ErrorKind::ConnectionReset, "stream reset"));
        assert!(reset.is_disconnect());
        assert!(!reset.is_malformed_input());

        let lost = ProtocolError::from(Error::new(ErrorKind::NotConnected, "connection lost"));
        assert!(lost.is_disconnect());

        let other = ProtocolError::from(Error::other("disk on fire"));
        assert_eq!(other, ProtocolError::Io("disk on fire".to_string()));
    }
}
