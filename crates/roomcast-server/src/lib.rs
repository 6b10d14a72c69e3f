//! Roomcast chat server.
//!
//! Wraps the [`roomcast_core`] room registry with QUIC transport, one
//! [`SessionController`] per client connection, and graceful shutdown.
//!
//! # Components
//!
//! - [`Server`]: accept loop, per-connection tasks, shutdown
//! - [`SessionController`]: join/chat/leave state machine for one connection
//! - [`translate`]: registry events to wire events
//! - [`QuinnTransport`]: QUIC endpoint
//! - [`memory`]: in-process client channel for driving controllers in tests
//! - [`SystemClock`]: production clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
pub mod memory;
mod session;
mod stream;
mod system_clock;
pub mod translate;
mod transport;

use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

pub use config::{ConfigError, DEFAULT_PORT, DEFAULT_SHUTDOWN_GRACE, ServerConfig};
pub use error::ServerError;
use roomcast_core::RoomRegistry;
use roomcast_proto::ErrorCategory;
pub use session::{SessionConfig, SessionController, SessionError, SessionState};
pub use stream::{EventSink, FramedRequests, RequestSource, StreamError};
pub use system_clock::SystemClock;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
pub use transport::{
    CLOSE_NORMAL, QuicEventSink, QuicRequestSource, QuinnConnection, QuinnTransport,
};

/// Production Roomcast server.
pub struct Server {
    transport: QuinnTransport,
    registry: Arc<RoomRegistry<SystemClock>>,
    config: ServerConfig,
}

impl Server {
    /// Validate `config` and bind the QUIC endpoint.
    pub fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let transport = QuinnTransport::bind(
            &config.addr(),
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;
        let registry = Arc::new(RoomRegistry::new(config.registry_config(), SystemClock));

        Ok(Self { transport, registry, config })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Shared room registry.
    pub fn registry(&self) -> &Arc<RoomRegistry<SystemClock>> {
        &self.registry
    }

    /// Accept connections until `shutdown` fires or the endpoint closes.
    ///
    /// On shutdown every connection is cancelled and given up to the
    /// configured grace period to run its cleanup before the endpoint closes.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        tracing::info!(
            app = %self.config.app_name,
            environment = %self.config.environment,
            addr = %self.local_addr()?,
            "server ready"
        );

        let tracker = TaskTracker::new();

        loop {
            let incoming = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                incoming = self.transport.accept() => match incoming {
                    Some(incoming) => incoming,
                    None => break,
                },
            };

            let connection = ConnectionContext {
                id: connection_id(),
                registry: Arc::clone(&self.registry),
                session: self.config.session_config(),
                max_frame_size: self.config.max_frame_size,
                cancel: shutdown.child_token(),
            };
            tracker.spawn(connection.serve(incoming));
        }

        tracing::info!(connections = tracker.len(), "server stopping");

        shutdown.cancel();
        tracker.close();
        if tokio::time::timeout(self.config.shutdown_grace, tracker.wait()).await.is_err() {
            tracing::warn!(
                remaining = tracker.len(),
                "shutdown grace elapsed with connections still open"
            );
        }

        self.transport.shutdown().await;
        tracing::info!("server stopped");
        Ok(())
    }
}

/// Everything one connection task needs.
struct ConnectionContext {
    id: u64,
    registry: Arc<RoomRegistry<SystemClock>>,
    session: SessionConfig,
    max_frame_size: usize,
    cancel: CancellationToken,
}

impl ConnectionContext {
    async fn serve(self, incoming: quinn::Incoming) {
        let id = self.id;

        let conn = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            conn = QuinnConnection::handshake(incoming) => match conn {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::debug!(connection = id, error = %err, "handshake failed");
                    return;
                },
            },
        };

        tracing::debug!(connection = id, remote = %conn.remote_addr(), "connection accepted");

        let channel = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                conn.close_with(ErrorCategory::Cancelled, "server shutting down");
                return;
            },
            channel = conn.accept_channel(self.max_frame_size) => channel,
        };
        let (requests, sink) = match channel {
            Ok(channel) => channel,
            Err(err) => {
                tracing::debug!(connection = id, error = %err, "no chat stream opened");
                return;
            },
        };

        let mut controller =
            SessionController::new(self.registry, self.session, id, self.cancel, sink);
        match controller.run(requests).await {
            Ok(()) => conn.close_normal(),
            Err(err) => conn.close_with(err.category(), &err.to_string()),
        }

        tracing::debug!(connection = id, "connection closed");
    }
}

/// Random per-connection identifier for log correlation.
fn connection_id() -> u64 {
    static FALLBACK: AtomicU64 = AtomicU64::new(1);

    getrandom::u64().unwrap_or_else(|err| {
        tracing::debug!(error = %err, "OS RNG unavailable, using sequential connection id");
        FALLBACK.fetch_add(1, Ordering::Relaxed)
    })
}
