//! Session protocol controller.
//!
//! One [`SessionController`] per client connection. It drives the
//! join/chat/leave state machine against the shared [`RoomRegistry`] and owns
//! the two activities of a joined connection: the read loop (this task) and
//! the forwarder (a spawned task draining the session's event queue).
//!
//! # State machine
//!
//! ```text
//! Idle --Join--> Joined --Leave/EOF/cancel/error--> Closed
//!   \____________________EOF/cancel/error_________/
//! ```
//!
//! Any rejected request terminates the connection; there is no
//! soft-fail-and-continue.
//!
//! # Cleanup
//!
//! Entering `Joined` creates a [`Membership`] that must be released exactly
//! once. An explicit Leave discharges it; every other exit path releases it
//! during cleanup, after the forwarder has stopped. Registry leave is
//! synchronous, so the disconnect that triggered cleanup cannot abort it.

use std::{sync::Arc, time::Duration};

use roomcast_core::{
    Clock, EventStream, JoinRequest, Message, RegistryError, RoomRegistry, Session,
    clock::from_unix_millis,
};
use roomcast_proto::{
    ChatPayload, ClientMessage, ErrorCategory, LeaveRequest, NoticeKind, ServerEvent, ServerNotice,
};
use thiserror::Error;
use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    stream::{EventSink, RequestSource, StreamError},
    translate,
};

/// Per-connection controller parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound on each cleanup step (forwarder stop, stream finish)
    pub cleanup_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { cleanup_grace: Duration::from_secs(5) }
    }
}

/// Connection-terminating protocol failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Join on a connection that already has a session
    #[error("session already exists on this connection")]
    SessionAlreadyExists,

    /// Chat before a successful join
    #[error("join required before sending messages")]
    JoinRequired,

    /// Leave before a successful join
    #[error("no active session to leave")]
    NoActiveSession,

    /// Request missing or undecodable
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Registry rejected the operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Connection cancelled (server shutdown or peer disconnect)
    #[error("connection cancelled")]
    Cancelled,

    /// Reading from or writing to the client failed
    #[error("stream failure: {0}")]
    Stream(String),
}

impl SessionError {
    /// Stable category used to close the connection.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidPayload(_)
            | Self::Registry(RegistryError::EmptyFields | RegistryError::EmptyMessage) => {
                ErrorCategory::Validation
            },
            Self::Registry(RegistryError::AlreadyJoined { .. }) => ErrorCategory::Conflict,
            Self::Registry(RegistryError::RoomNotFound(_)) => ErrorCategory::NotFound,
            Self::SessionAlreadyExists
            | Self::JoinRequired
            | Self::NoActiveSession
            | Self::Registry(RegistryError::UserNotInRoom { .. }) => ErrorCategory::Precondition,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Stream(_) => ErrorCategory::Internal,
        }
    }

    /// Whether this is a rejected client request (as opposed to the
    /// connection going away).
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::Stream(_))
    }
}

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session established
    Idle,
    /// Session active, forwarder running
    Joined,
    /// Terminal
    Closed,
}

/// Obligation to leave the room, held while `Joined`.
///
/// Dropping it performs the leave. A leave that finds the user already gone
/// is the benign race with an explicit or foreign leave.
struct Membership<C: Clock> {
    registry: Arc<RoomRegistry<C>>,
    room_id: String,
    user_id: String,
    connection_id: u64,
    discharged: bool,
}

impl<C: Clock> Membership<C> {
    fn new(registry: Arc<RoomRegistry<C>>, session: &Session, connection_id: u64) -> Self {
        Self {
            registry,
            room_id: session.room_id.clone(),
            user_id: session.user_id.clone(),
            connection_id,
            discharged: false,
        }
    }

    fn is_for(&self, room_id: &str, user_id: &str) -> bool {
        self.room_id == room_id && self.user_id == user_id
    }

    /// The session was already removed through an explicit leave.
    fn discharge(mut self) {
        self.discharged = true;
    }
}

impl<C: Clock> Drop for Membership<C> {
    fn drop(&mut self) {
        if self.discharged {
            return;
        }
        match self.registry.leave(&self.room_id, &self.user_id) {
            Ok(()) => tracing::debug!(
                connection = self.connection_id,
                room = %self.room_id,
                user = %self.user_id,
                "implicit leave on disconnect"
            ),
            Err(RegistryError::UserNotInRoom { .. } | RegistryError::RoomNotFound(_)) => {
                tracing::debug!(
                    connection = self.connection_id,
                    room = %self.room_id,
                    user = %self.user_id,
                    "session already gone at cleanup"
                );
            },
            Err(err) => tracing::warn!(
                connection = self.connection_id,
                room = %self.room_id,
                user = %self.user_id,
                error = %err,
                "cleanup leave failed"
            ),
        }
    }
}

/// Handle to the running forwarder task.
struct Forwarder {
    stop: CancellationToken,
    handle: JoinHandle<Result<(), StreamError>>,
}

impl Forwarder {
    fn spawn<S: EventSink + 'static>(
        events: EventStream,
        sink: Arc<Mutex<S>>,
        stop: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(forward(events, sink, stop.clone()));
        Self { stop, handle }
    }

    /// Stop the task and wait for it, bounded by `grace`.
    async fn shutdown(mut self, grace: Duration, connection_id: u64) {
        self.stop.cancel();
        match tokio::time::timeout(grace, &mut self.handle).await {
            Ok(Ok(Ok(()))) => {},
            Ok(Ok(Err(err))) => {
                tracing::debug!(connection = connection_id, error = %err, "forwarder write failed");
            },
            Ok(Err(err)) => {
                tracing::warn!(connection = connection_id, error = %err, "forwarder task failed");
            },
            Err(_) => {
                tracing::warn!(
                    connection = connection_id,
                    "forwarder did not stop in time, aborting"
                );
                self.handle.abort();
            },
        }
    }
}

/// Drain `events` into `sink` until the queue closes, `stop` fires or a
/// write fails.
async fn forward<S: EventSink>(
    mut events: EventStream,
    sink: Arc<Mutex<S>>,
    stop: CancellationToken,
) -> Result<(), StreamError> {
    loop {
        let event = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(()),
            event = events.recv() => match event {
                Some(event) => event,
                None => return Ok(()),
            },
        };

        let wire = translate::event_to_wire(&event);
        let mut guard = tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(()),
            guard = sink.lock() => guard,
        };
        tokio::select! {
            biased;
            () = stop.cancelled() => return Ok(()),
            result = guard.send(wire) => result?,
        }
    }
}

/// Resolve when the forwarder task ends. Pending forever if none runs.
async fn forwarder_exit(forwarder: &mut Option<Forwarder>) -> Result<(), StreamError> {
    match forwarder {
        Some(forwarder) => match (&mut forwarder.handle).await {
            Ok(result) => result,
            Err(err) => Err(StreamError::Io(format!("forwarder task failed: {err}"))),
        },
        None => std::future::pending().await,
    }
}

/// Drives one client connection.
pub struct SessionController<C: Clock, S: EventSink + 'static> {
    registry: Arc<RoomRegistry<C>>,
    config: SessionConfig,
    connection_id: u64,
    cancel: CancellationToken,
    sink: Arc<Mutex<S>>,
    state: SessionState,
    membership: Option<Membership<C>>,
    forwarder: Option<Forwarder>,
}

impl<C: Clock, S: EventSink + 'static> SessionController<C, S> {
    /// Create a controller for one connection.
    ///
    /// `cancel` is the connection's cancellation scope; firing it ends the
    /// session with [`SessionError::Cancelled`].
    pub fn new(
        registry: Arc<RoomRegistry<C>>,
        config: SessionConfig,
        connection_id: u64,
        cancel: CancellationToken,
        sink: S,
    ) -> Self {
        Self {
            registry,
            config,
            connection_id,
            cancel,
            sink: Arc::new(Mutex::new(sink)),
            state: SessionState::Idle,
            membership: None,
            forwarder: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serve requests until the connection ends, then clean up.
    ///
    /// Returns `Ok(())` for a normal end (explicit Leave or end of input).
    /// Cleanup runs on every path before this returns.
    pub async fn run<R: RequestSource>(&mut self, mut requests: R) -> Result<(), SessionError> {
        if self.state == SessionState::Closed {
            return Err(SessionError::Stream("session already closed".to_string()));
        }

        let result = self.read_loop(&mut requests).await;
        if let Err(err) = &result {
            tracing::debug!(connection = self.connection_id, error = %err, "session terminated");
        }

        self.cleanup(result.as_ref().err()).await;
        self.state = SessionState::Closed;
        result
    }

    async fn read_loop<R: RequestSource>(&mut self, requests: &mut R) -> Result<(), SessionError> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(SessionError::Cancelled),
                exit = forwarder_exit(&mut self.forwarder) => {
                    self.forwarder = None;
                    match exit {
                        // Queue closed: the session was left from elsewhere
                        Ok(()) => continue,
                        Err(err) => return Err(SessionError::Stream(err.to_string())),
                    }
                },
                next = requests.recv() => next,
            };

            let envelope = match next {
                Ok(Some(envelope)) => envelope,
                Ok(None) => return Ok(()),
                Err(StreamError::Malformed(reason)) => {
                    return Err(SessionError::InvalidPayload(reason));
                },
                Err(StreamError::Closed(reason)) => {
                    tracing::debug!(connection = self.connection_id, %reason, "peer went away");
                    return Err(SessionError::Cancelled);
                },
                Err(err) => return Err(SessionError::Stream(err.to_string())),
            };

            match envelope.message {
                Some(ClientMessage::Join(request)) => self.handle_join(request).await?,
                Some(ClientMessage::Chat(payload)) => self.handle_chat(payload)?,
                Some(ClientMessage::Leave(request)) => {
                    self.handle_leave(&request)?;
                    return Ok(());
                },
                None => {
                    return Err(SessionError::InvalidPayload("unrecognized request".to_string()));
                },
            }
        }
    }

    async fn handle_join(
        &mut self,
        request: roomcast_proto::JoinRequest,
    ) -> Result<(), SessionError> {
        if self.membership.is_some() {
            return Err(SessionError::SessionAlreadyExists);
        }

        let (session, events) = self.registry.join(JoinRequest {
            user_id: request.user_id,
            display_name: request.display_name,
            room_id: request.room,
        })?;

        self.membership =
            Some(Membership::new(Arc::clone(&self.registry), &session, self.connection_id));
        self.state = SessionState::Joined;

        tracing::info!(
            connection = self.connection_id,
            room = %session.room_id,
            user = %session.user_id,
            "session joined"
        );

        self.write(translate::join_ack(&session)).await?;

        self.forwarder =
            Some(Forwarder::spawn(events, Arc::clone(&self.sink), self.cancel.child_token()));
        Ok(())
    }

    fn handle_chat(&self, payload: ChatPayload) -> Result<(), SessionError> {
        if self.membership.is_none() {
            return Err(SessionError::JoinRequired);
        }

        // Zero is treated as "not provided"
        let sent_at = match payload.timestamp_utc {
            Some(millis) if millis != 0 => from_unix_millis(millis),
            _ => self.registry.clock().now(),
        };

        self.registry.broadcast(Message {
            user_id: payload.user_id,
            room_id: payload.room,
            content: payload.content,
            sent_at,
        })?;
        Ok(())
    }

    fn handle_leave(&mut self, request: &LeaveRequest) -> Result<(), SessionError> {
        let owns_session = match &self.membership {
            Some(membership) => membership.is_for(&request.room, &request.user_id),
            None => return Err(SessionError::NoActiveSession),
        };

        self.registry.leave(&request.room, &request.user_id)?;

        if owns_session && let Some(membership) = self.membership.take() {
            membership.discharge();
        }

        tracing::info!(
            connection = self.connection_id,
            room = %request.room,
            user = %request.user_id,
            "session left"
        );
        Ok(())
    }

    /// Write one event, giving up if the connection is cancelled.
    async fn write(&self, event: ServerEvent) -> Result<(), SessionError> {
        let sink = Arc::clone(&self.sink);
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(SessionError::Cancelled),
            result = async move { sink.lock().await.send(event).await } => {
                result.map_err(|err| SessionError::Stream(err.to_string()))
            },
        }
    }

    async fn cleanup(&mut self, failure: Option<&SessionError>) {
        let grace = self.config.cleanup_grace;

        if let Some(forwarder) = self.forwarder.take() {
            forwarder.shutdown(grace, self.connection_id).await;
        }

        let (user_id, room) = self
            .membership
            .as_ref()
            .map(|m| (m.user_id.clone(), m.room_id.clone()))
            .unwrap_or_default();
        drop(self.membership.take());

        let mut sink = self.sink.lock().await;

        if let Some(err) = failure.filter(|err| err.is_rejection()) {
            let notice = ServerEvent::Notice(ServerNotice {
                kind: NoticeKind::Error,
                message: err.to_string(),
                user_id,
                room,
            });
            if tokio::time::timeout(grace, sink.send(notice)).await.is_err() {
                tracing::debug!(connection = self.connection_id, "error notice timed out");
            }
        }

        match tokio::time::timeout(grace, sink.finish()).await {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                tracing::debug!(
                    connection = self.connection_id,
                    error = %err,
                    "stream finish failed"
                );
            },
            Err(_) => tracing::debug!(connection = self.connection_id, "stream finish timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_are_stable() {
        let cases = [
            (SessionError::InvalidPayload("x".to_string()), ErrorCategory::Validation),
            (SessionError::Registry(RegistryError::EmptyFields), ErrorCategory::Validation),
            (SessionError::Registry(RegistryError::EmptyMessage), ErrorCategory::Validation),
            (
                SessionError::Registry(RegistryError::AlreadyJoined {
                    room_id: "r".to_string(),
                    user_id: "u".to_string(),
                }),
                ErrorCategory::Conflict,
            ),
            (
                SessionError::Registry(RegistryError::RoomNotFound("r".to_string())),
                ErrorCategory::NotFound,
            ),
            (
                SessionError::Registry(RegistryError::UserNotInRoom {
                    room_id: "r".to_string(),
                    user_id: "u".to_string(),
                }),
                ErrorCategory::Precondition,
            ),
            (SessionError::SessionAlreadyExists, ErrorCategory::Precondition),
            (SessionError::JoinRequired, ErrorCategory::Precondition),
            (SessionError::NoActiveSession, ErrorCategory::Precondition),
            (SessionError::Cancelled, ErrorCategory::Cancelled),
            (SessionError::Stream("reset".to_string()), ErrorCategory::Internal),
        ];

        for (err, category) in cases {
            assert_eq!(err.category(), category, "{err}");
        }
    }

    #[test]
    fn only_client_faults_are_rejections() {
        assert!(SessionError::JoinRequired.is_rejection());
        assert!(SessionError::Registry(RegistryError::EmptyMessage).is_rejection());
        assert!(!SessionError::Cancelled.is_rejection());
        assert!(!SessionError::Stream("reset".to_string()).is_rejection());
    }
}
