//! Transport seam for the session controller.
//!
//! The controller only sees already-decoded requests and hands out
//! already-translated events. [`RequestSource`] and [`EventSink`] are the two
//! halves of one client channel; the QUIC transport and the in-memory duplex
//! used by tests both implement them.

use async_trait::async_trait;
use roomcast_proto::{ClientEnvelope, FrameReader, ProtocolError, ServerEvent};
use thiserror::Error;
use tokio::io::AsyncRead;

/// Failure reading from or writing to a client channel.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Inbound bytes did not decode into a request
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Peer went away or the channel was torn down
    #[error("stream closed: {0}")]
    Closed(String),

    /// Other I/O failure
    #[error("stream I/O error: {0}")]
    Io(String),
}

impl From<ProtocolError> for StreamError {
    fn from(err: ProtocolError) -> Self {
        if err.is_malformed_input() {
            Self::Malformed(err.to_string())
        } else if err.is_disconnect() {
            Self::Closed(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Inbound half: decoded client requests.
///
/// `recv` must be cancel-safe. The controller races it against its own
/// signals and may drop a pending call, then call again.
#[async_trait]
pub trait RequestSource: Send {
    /// Next request. `Ok(None)` is a clean end of input.
    async fn recv(&mut self) -> Result<Option<ClientEnvelope>, StreamError>;
}

/// Requests decoded from a length-prefixed byte stream.
pub struct FramedRequests<R> {
    frames: FrameReader<R>,
}

impl<R: AsyncRead + Unpin> FramedRequests<R> {
    /// Decode requests from `reader`, rejecting bodies over `max_frame_size`.
    pub fn new(reader: R, max_frame_size: usize) -> Self {
        Self { frames: FrameReader::new(reader, max_frame_size) }
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin> RequestSource for FramedRequests<R> {
    async fn recv(&mut self) -> Result<Option<ClientEnvelope>, StreamError> {
        Ok(self.frames.read_message().await?)
    }
}

/// Outbound half: server events for the client.
///
/// A sink is driven by one writer at a time; the controller wraps it in a
/// mutex shared by the read loop and the forwarder.
#[async_trait]
pub trait EventSink: Send {
    /// Write one event.
    async fn send(&mut self, event: ServerEvent) -> Result<(), StreamError>;

    /// Signal that no more events follow and wait for the peer to have them.
    async fn finish(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_errors_map_to_stream_errors() {
        let malformed = StreamError::from(ProtocolError::EmptyFrame);
        assert!(matches!(malformed, StreamError::Malformed(_)));

        let gone = StreamError::from(ProtocolError::Disconnected("reset".to_string()));
        assert!(matches!(gone, StreamError::Closed(_)));

        let io = StreamError::from(ProtocolError::Io("read failed".to_string()));
        assert!(matches!(io, StreamError::Io(_)));
    }
}
