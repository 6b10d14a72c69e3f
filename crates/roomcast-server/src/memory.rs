//! In-process client channel.
//!
//! A pair of tokio mpsc queues standing in for one client stream, so the
//! session controller can be driven without a network.

use async_trait::async_trait;
use roomcast_proto::{ClientEnvelope, ServerEvent};
use tokio::sync::mpsc;

use crate::stream::{EventSink, RequestSource, StreamError};

/// Inbound item: a decoded request or a read failure to inject.
pub type Inbound = Result<ClientEnvelope, StreamError>;

/// Server side of an in-memory channel.
pub struct MemoryRequests {
    inbound: mpsc::Receiver<Inbound>,
}

/// Server side of an in-memory channel.
pub struct MemorySink {
    outbound: mpsc::Sender<ServerEvent>,
    finished: bool,
}

/// Client side of an in-memory channel.
pub struct MemoryClient {
    /// Requests for the server. Dropping this is a clean end of input
    pub to_server: mpsc::Sender<Inbound>,
    /// Events written by the server. Ends when the server finishes or drops its sink
    pub from_server: mpsc::Receiver<ServerEvent>,
}

impl MemoryClient {
    /// Queue a request.
    pub async fn send(&self, envelope: ClientEnvelope) -> bool {
        self.to_server.send(Ok(envelope)).await.is_ok()
    }

    /// Next server event, `None` once the server side is done.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.from_server.recv().await
    }
}

/// Create a connected in-memory channel with room for `capacity` items in
/// each direction.
pub fn duplex(capacity: usize) -> (MemoryClient, MemoryRequests, MemorySink) {
    let (to_server, inbound) = mpsc::channel(capacity.max(1));
    let (outbound, from_server) = mpsc::channel(capacity.max(1));
    (
        MemoryClient { to_server, from_server },
        MemoryRequests { inbound },
        MemorySink { outbound, finished: false },
    )
}

#[async_trait]
impl RequestSource for MemoryRequests {
    async fn recv(&mut self) -> Result<Option<ClientEnvelope>, StreamError> {
        self.inbound.recv().await.transpose()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&mut self, event: ServerEvent) -> Result<(), StreamError> {
        if self.finished {
            return Err(StreamError::Closed("sink already finished".to_string()));
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| StreamError::Closed("client receiver dropped".to_string()))
    }

    async fn finish(&mut self) -> Result<(), StreamError> {
        self.finished = true;
        // Swap in a detached sender so the client sees end-of-stream now
        let (detached, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.outbound, detached));
        Ok(())
    }
}
