//! Roomcast server binary.
//!
//! # Usage
//!
//! ```bash
//! # Self-signed certificate (development)
//! roomcast-server --host 0.0.0.0 --port 4433
//!
//! # TLS certificate (production)
//! roomcast-server --host 0.0.0.0 --cert cert.pem --key key.pem
//! ```
//!
//! Every flag can also be set through its `ROOMCAST_*` environment variable,
//! including from a `.env` file in the working directory.

use std::{path::PathBuf, time::Duration};

use clap::Parser;
use roomcast_server::{DEFAULT_PORT, Server, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Roomcast chat server
#[derive(Parser, Debug)]
#[command(name = "roomcast-server")]
#[command(about = "Room-based chat server over QUIC")]
#[command(version)]
struct Args {
    /// Service name used in logs
    #[arg(long, env = "ROOMCAST_APP_NAME", default_value = "roomcast")]
    app_name: String,

    /// Deployment environment label
    #[arg(long, env = "ROOMCAST_ENV", default_value = "development")]
    environment: String,

    /// Host or IP to bind
    #[arg(long, env = "ROOMCAST_HOST", default_value = "127.0.0.1")]
    host: String,

    /// UDP port to bind
    #[arg(short, long, env = "ROOMCAST_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Path to TLS certificate (PEM format)
    #[arg(short, long, env = "ROOMCAST_TLS_CERT")]
    cert: Option<PathBuf>,

    /// Path to TLS private key (PEM format)
    #[arg(short, long, env = "ROOMCAST_TLS_KEY")]
    key: Option<PathBuf>,

    /// Capacity of each subscriber's event queue
    #[arg(long, env = "ROOMCAST_BUFFER_SIZE", default_value_t = roomcast_core::DEFAULT_BUFFER_SIZE)]
    buffer_size: usize,

    /// Time connections get to clean up on shutdown, in milliseconds
    #[arg(long, env = "ROOMCAST_SHUTDOWN_GRACE_MS", default_value_t = 5000)]
    shutdown_grace_ms: u64,

    /// Largest accepted inbound frame, in bytes
    #[arg(long, env = "ROOMCAST_MAX_FRAME_SIZE", default_value_t = roomcast_proto::MAX_FRAME_SIZE)]
    max_frame_size: usize,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            app_name: self.app_name,
            environment: self.environment,
            host: self.host,
            port: self.port,
            cert_path: self.cert,
            key_path: self.key,
            buffer_size: self.buffer_size,
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            max_frame_size: self.max_frame_size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Must run before parsing so `.env` values feed clap's `env` lookups
    let dotenv = dotenvy::dotenv();

    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded environment file"),
        Err(err) if err.not_found() => {},
        Err(err) => tracing::warn!(error = %err, "failed to load .env file"),
    }

    let config = args.into_config();
    tracing::info!(
        app = %config.app_name,
        environment = %config.environment,
        "roomcast server starting"
    );

    if config.cert_path.is_none() {
        tracing::warn!("no TLS certificate provided, using self-signed certificate");
    }

    let server = Server::bind(config)?;
    tracing::info!(addr = %server.local_addr()?, "listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(forward_signals(shutdown.clone()));

    server.run(shutdown).await?;

    Ok(())
}

/// Cancel `shutdown` on SIGINT or SIGTERM.
async fn forward_signals(shutdown: CancellationToken) {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }

    shutdown.cancel();
}
