//! Server error types.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur in the server runtime.
///
/// Per-connection protocol failures are [`SessionError`](crate::SessionError)
/// and never surface here; they close only the offending connection.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration error (invalid settings, unreadable TLS material).
    ///
    /// Fatal: prevents server startup. Fix configuration and restart.
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport/network error (bind failure, handshake failure, I/O error).
    ///
    /// May be transient (one failed handshake) or fatal (address in use).
    #[error("transport error: {0}")]
    Transport(String),
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<std::io::Error> for ServerError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
