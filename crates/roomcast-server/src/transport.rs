//! Quinn-based QUIC transport.
//!
//! Each client connection carries exactly one bidirectional stream, the chat
//! channel, framed as `[u32 BE length][CBOR body]`. TLS 1.3 via rustls with
//! ALPN "roomcast". PEM certificates are used when configured; otherwise a
//! self-signed certificate is generated, which is only suitable for local
//! development.

use std::{
    net::{SocketAddr, ToSocketAddrs},
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use quinn::{Endpoint, Incoming, RecvStream, SendStream, ServerConfig, VarInt};
use roomcast_proto::{ALPN_PROTOCOL, ErrorCategory, ServerEvent, write_frame};

use crate::{
    error::ServerError,
    stream::{EventSink, FramedRequests, StreamError},
};

/// Application close code for a normal end of session.
pub const CLOSE_NORMAL: u32 = 0;

/// QUIC endpoint accepting client connections.
pub struct QuinnTransport {
    endpoint: Endpoint,
}

impl QuinnTransport {
    /// Create and bind a new QUIC endpoint.
    ///
    /// `address` is `host:port`; host names are resolved and the first
    /// address is used. If `cert_path` and `key_path` are both provided they
    /// are used for TLS. Otherwise a self-signed certificate is generated.
    pub fn bind(
        address: &str,
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self, ServerError> {
        let addr = address
            .to_socket_addrs()
            .map_err(|e| ServerError::Config(format!("invalid bind address '{address}': {e}")))?
            .next()
            .ok_or_else(|| {
                ServerError::Config(format!("bind address '{address}' did not resolve"))
            })?;

        let server_config = match (cert_path, key_path) {
            (Some(cert), Some(key)) => load_tls_config(cert, key)?,
            _ => generate_self_signed_config()?,
        };

        let endpoint = Endpoint::server(server_config, addr)
            .map_err(|e| ServerError::Transport(format!("failed to create endpoint: {e}")))?;

        tracing::info!(%addr, "QUIC transport bound");

        Ok(Self { endpoint })
    }

    /// Wait for the next incoming connection attempt.
    ///
    /// `None` once the endpoint is closed.
    pub async fn accept(&self) -> Option<Incoming> {
        self.endpoint.accept().await
    }

    /// Local address the transport is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| ServerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Close every connection and wait until the endpoint is idle.
    pub async fn shutdown(&self) {
        self.endpoint.close(VarInt::from_u32(CLOSE_NORMAL), b"server shutdown");
        self.endpoint.wait_idle().await;
    }
}

/// An established client connection.
///
/// Clones share the underlying QUIC connection.
#[derive(Clone)]
pub struct QuinnConnection {
    connection: quinn::Connection,
}

impl QuinnConnection {
    /// Complete the handshake of an incoming connection.
    pub async fn handshake(incoming: Incoming) -> Result<Self, ServerError> {
        let connection = incoming
            .await
            .map_err(|e| ServerError::Transport(format!("connection failed: {e}")))?;
        Ok(Self { connection })
    }

    /// Accept the client's chat stream.
    pub async fn accept_channel(
        &self,
        max_frame_size: usize,
    ) -> Result<(QuicRequestSource, QuicEventSink), ServerError> {
        let (send, recv) = self
            .connection
            .accept_bi()
            .await
            .map_err(|e| ServerError::Transport(format!("accept_bi failed: {e}")))?;
        Ok((FramedRequests::new(recv, max_frame_size), QuicEventSink { send }))
    }

    /// Remote peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close normally.
    pub fn close_normal(&self) {
        self.connection.close(VarInt::from_u32(CLOSE_NORMAL), b"");
    }

    /// Close with the application code of `category` and a reason text.
    pub fn close_with(&self, category: ErrorCategory, reason: &str) {
        self.connection.close(VarInt::from_u32(category.code()), reason.as_bytes());
    }
}

/// Inbound half of the chat stream.
pub type QuicRequestSource = FramedRequests<RecvStream>;

/// Outbound half of the chat stream.
pub struct QuicEventSink {
    send: SendStream,
}

#[async_trait]
impl EventSink for QuicEventSink {
    async fn send(&mut self, event: ServerEvent) -> Result<(), StreamError> {
        Ok(write_frame(&mut self.send, &event).await?)
    }

    async fn finish(&mut self) -> Result<(), StreamError> {
        self.send.finish().map_err(|e| StreamError::Closed(e.to_string()))?;
        self.send.stopped().await.map_err(|e| StreamError::Closed(e.to_string()))?;
        Ok(())
    }
}

/// Load TLS configuration from certificate and key files.
fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, ServerError> {
    let cert_pem = std::fs::read(cert_path).map_err(|e| {
        ServerError::Config(format!("failed to read cert '{}': {e}", cert_path.display()))
    })?;
    let key_pem = std::fs::read(key_path).map_err(|e| {
        ServerError::Config(format!("failed to read key '{}': {e}", key_path.display()))
    })?;

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ServerError::Config(format!("failed to parse certificates: {e}")))?;

    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| ServerError::Config(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ServerError::Config("no private key found".to_string()))?;

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    quic_server_config(tls_config)
}

/// Generate a self-signed certificate for local use.
fn generate_self_signed_config() -> Result<ServerConfig, ServerError> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .map_err(|e| ServerError::Config(format!("failed to generate self-signed cert: {e}")))?;

    let cert_chain = vec![cert.cert.der().clone()];
    let key = rustls::pki_types::PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(cert_chain, key.into())
        .map_err(|e| ServerError::Config(format!("invalid TLS config: {e}")))?;

    tracing::warn!("using self-signed certificate, not for production use");

    quic_server_config(tls_config)
}

fn quic_server_config(mut tls_config: rustls::ServerConfig) -> Result<ServerConfig, ServerError> {
    tls_config.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config)
        .map_err(|e| ServerError::Config(format!("QUIC config error: {e}")))?;

    Ok(ServerConfig::with_crypto(Arc::new(crypto)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_with_self_signed_certificate() {
        let transport = QuinnTransport::bind("127.0.0.1:0", None, None).unwrap();

        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn rejects_unparseable_address() {
        let result = QuinnTransport::bind("localhost:port", None, None);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn missing_certificate_file_is_config_error() {
        let result = QuinnTransport::bind(
            "127.0.0.1:0",
            Some(Path::new("/nonexistent/cert.pem")),
            Some(Path::new("/nonexistent/key.pem")),
        );
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
