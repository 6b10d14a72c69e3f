//! Server configuration.
//!
//! Plain data: the binary fills it from flags, environment variables and an
//! optional `.env` file, and the runtime hands the relevant parts to the
//! registry and session controllers as constructor parameters.

use std::{path::PathBuf, time::Duration};

use roomcast_core::{DEFAULT_BUFFER_SIZE, RegistryConfig};
use roomcast_proto::MAX_FRAME_SIZE;
use thiserror::Error;

use crate::session::SessionConfig;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 4433;

/// Default time allowed for connections to finish cleanup on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required text field is empty
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Port 0 is not a listen port
    #[error("port must be non-zero")]
    ZeroPort,

    /// Subscriber queues need at least one slot
    #[error("buffer size must be positive")]
    ZeroBufferSize,

    /// Frame limit outside `1..=MAX_FRAME_SIZE`
    #[error("max frame size {size} outside 1..={max}")]
    FrameSize {
        /// Configured value
        size: usize,
        /// Protocol ceiling
        max: usize,
    },

    /// Only one half of the TLS key pair was configured
    #[error("TLS certificate and key must be configured together")]
    IncompleteTls,
}

/// Runtime configuration for [`Server`](crate::Server).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Service name, used in logs
    pub app_name: String,
    /// Deployment environment label (e.g. "development")
    pub environment: String,
    /// Host or IP to bind
    pub host: String,
    /// UDP port to bind
    pub port: u16,
    /// TLS certificate chain (PEM). `None` generates a self-signed certificate
    pub cert_path: Option<PathBuf>,
    /// TLS private key (PEM)
    pub key_path: Option<PathBuf>,
    /// Capacity of each subscriber's event queue
    pub buffer_size: usize,
    /// How long shutdown waits for connections to clean up
    pub shutdown_grace: Duration,
    /// Largest accepted inbound frame body
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: "roomcast".to_string(),
            environment: "development".to_string(),
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            cert_path: None,
            key_path: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// `host:port` in a form `Server::bind` can resolve.
    ///
    /// IPv6 literals are bracketed.
    pub fn addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Check every field.
    ///
    /// # Errors
    ///
    /// The first offending field, as [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_name.trim().is_empty() {
            return Err(ConfigError::Empty("app name"));
        }
        if self.environment.trim().is_empty() {
            return Err(ConfigError::Empty("environment"));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::Empty("host"));
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.max_frame_size == 0 || self.max_frame_size > MAX_FRAME_SIZE {
            return Err(ConfigError::FrameSize { size: self.max_frame_size, max: MAX_FRAME_SIZE });
        }
        if self.cert_path.is_some() != self.key_path.is_some() {
            return Err(ConfigError::IncompleteTls);
        }
        Ok(())
    }

    /// Registry parameters derived from this configuration.
    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig { buffer_size: self.buffer_size }
    }

    /// Per-connection controller parameters derived from this configuration.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig { cleanup_grace: self.shutdown_grace }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.addr(), "127.0.0.1:4433");
    }

    #[test]
    fn ipv6_host_is_bracketed() {
        let config =
            ServerConfig { host: "::1".to_string(), port: 9000, ..ServerConfig::default() };
        assert_eq!(config.addr(), "[::1]:9000");
    }

    #[test]
    fn rejects_each_invalid_field() {
        let base = ServerConfig::default;
        let cases = [
            (ServerConfig { app_name: " ".to_string(), ..base() }, ConfigError::Empty("app name")),
            (
                ServerConfig { environment: String::new(), ..base() },
                ConfigError::Empty("environment"),
            ),
            (ServerConfig { host: String::new(), ..base() }, ConfigError::Empty("host")),
            (ServerConfig { port: 0, ..base() }, ConfigError::ZeroPort),
            (ServerConfig { buffer_size: 0, ..base() }, ConfigError::ZeroBufferSize),
            (
                ServerConfig { max_frame_size: 0, ..base() },
                ConfigError::FrameSize { size: 0, max: MAX_FRAME_SIZE },
            ),
            (
                ServerConfig { max_frame_size: MAX_FRAME_SIZE + 1, ..base() },
                ConfigError::FrameSize { size: MAX_FRAME_SIZE + 1, max: MAX_FRAME_SIZE },
            ),
            (
                ServerConfig { cert_path: Some(PathBuf::from("cert.pem")), ..base() },
                ConfigError::IncompleteTls,
            ),
        ];

        for (config, expected) in cases {
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn zero_grace_is_allowed() {
        let config = ServerConfig { shutdown_grace: Duration::ZERO, ..ServerConfig::default() };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.session_config().cleanup_grace, Duration::ZERO);
    }

    #[test]
    fn derives_core_parameters() {
        let config = ServerConfig { buffer_size: 7, ..ServerConfig::default() };
        assert_eq!(config.registry_config().buffer_size, 7);
    }
}
