//! QUIC transport for the client.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use quinn::{ClientConfig, ConnectionError, Endpoint, RecvStream, SendStream, VarInt};
use roomcast_proto::{
    ALPN_PROTOCOL, ClientEnvelope, ErrorCategory, MAX_FRAME_SIZE, ServerEvent, read_message,
    write_frame,
};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};

/// Channel capacity in each direction.
const CHANNEL_CAPACITY: usize = 32;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Connection attempt exceeded the configured timeout
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// Chat stream could not be opened
    #[error("stream error: {0}")]
    Stream(String),

    /// Local configuration rejected
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Client connection parameters.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Give up connecting after this long
    pub connect_timeout: Duration,
    /// Close the connection after this long without traffic
    pub idle_timeout: Duration,
    /// Largest accepted inbound frame body
    pub max_frame_size: usize,
    /// TLS server name
    pub server_name: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
            max_frame_size: MAX_FRAME_SIZE,
            server_name: "localhost".to_string(),
        }
    }
}

/// How the server ended the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseStatus {
    /// Application close code, `None` if the connection did not end with an
    /// application close (timeout, reset, local close)
    pub code: Option<u32>,
    /// Close reason text
    pub reason: String,
}

impl CloseStatus {
    /// Error category for a non-zero application code.
    pub fn category(&self) -> Option<ErrorCategory> {
        self.code.and_then(ErrorCategory::from_code)
    }

    /// The server ended the session normally.
    pub fn is_normal(&self) -> bool {
        self.code == Some(0)
    }

    fn from_error(err: &ConnectionError) -> Self {
        match err {
            ConnectionError::ApplicationClosed(close) => Self {
                code: u32::try_from(close.error_code.into_inner()).ok(),
                reason: String::from_utf8_lossy(&close.reason).into_owned(),
            },
            other => Self { code: None, reason: other.to_string() },
        }
    }
}

/// Handle to a connected client.
///
/// Requests sent on `to_server` are framed onto the chat stream in order;
/// `from_server` yields server events until the server finishes the stream
/// or the connection ends.
pub struct ConnectedClient {
    /// Send requests to the server
    pub to_server: mpsc::Sender<ClientEnvelope>,
    /// Receive events from the server
    pub from_server: mpsc::Receiver<ServerEvent>,
    connection: quinn::Connection,
    endpoint: Endpoint,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl ConnectedClient {
    /// Signal end of input to the server.
    ///
    /// Requests already queued are still sent. Clones of `to_server` held
    /// elsewhere keep the stream open until they are dropped.
    pub fn finish(&mut self) {
        let (closed, _) = mpsc::channel(1);
        drop(std::mem::replace(&mut self.to_server, closed));
    }

    /// Close the connection immediately.
    pub fn stop(&self) {
        self.connection.close(VarInt::from_u32(0), b"client stop");
        self.writer.abort();
        self.reader.abort();
    }

    /// How the connection ended, if it has.
    pub fn close_reason(&self) -> Option<CloseStatus> {
        self.connection.close_reason().map(|err| CloseStatus::from_error(&err))
    }

    /// Wait for the connection to end.
    pub async fn closed(&self) -> CloseStatus {
        CloseStatus::from_error(&self.connection.closed().await)
    }

    /// Local address of the client endpoint.
    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.endpoint.local_addr().map_err(|e| TransportError::Connection(e.to_string()))
    }
}

/// Connect to a Roomcast server with default settings.
pub async fn connect(server_addr: &str) -> Result<ConnectedClient, TransportError> {
    connect_with_config(server_addr, TransportConfig::default()).await
}

/// Connect to a Roomcast server and open the chat stream.
pub async fn connect_with_config(
    server_addr: &str,
    config: TransportConfig,
) -> Result<ConnectedClient, TransportError> {
    let addr = tokio::net::lookup_host(server_addr)
        .await
        .map_err(|e| TransportError::Connection(format!("invalid address '{server_addr}': {e}")))?
        .next()
        .ok_or_else(|| TransportError::Connection(format!("'{server_addr}' did not resolve")))?;

    let local = if addr.is_ipv6() {
        SocketAddr::from(([0u16; 8], 0))
    } else {
        SocketAddr::from(([0, 0, 0, 0], 0))
    };
    let mut endpoint = Endpoint::client(local)
        .map_err(|e| TransportError::Connection(format!("endpoint creation failed: {e}")))?;
    endpoint.set_default_client_config(insecure_client_config(config.idle_timeout)?);

    let connecting = endpoint
        .connect(addr, &config.server_name)
        .map_err(|e| TransportError::Connection(format!("connect failed: {e}")))?;
    let connection = tokio::time::timeout(config.connect_timeout, connecting)
        .await
        .map_err(|_| TransportError::Timeout(config.connect_timeout))?
        .map_err(|e| TransportError::Connection(format!("connection failed: {e}")))?;

    let (send, recv) = connection
        .open_bi()
        .await
        .map_err(|e| TransportError::Stream(format!("open_bi failed: {e}")))?;

    let (to_server_tx, to_server_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (from_server_tx, from_server_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let writer = tokio::spawn(write_requests(send, to_server_rx));
    let reader = tokio::spawn(read_events(recv, from_server_tx, config.max_frame_size));

    tracing::debug!(%addr, "connected");

    Ok(ConnectedClient {
        to_server: to_server_tx,
        from_server: from_server_rx,
        connection,
        endpoint,
        writer,
        reader,
    })
}

/// Frame queued requests onto the stream; finish it once the queue closes.
async fn write_requests(mut send: SendStream, mut requests: mpsc::Receiver<ClientEnvelope>) {
    while let Some(envelope) = requests.recv().await {
        if let Err(e) = write_frame(&mut send, &envelope).await {
            tracing::debug!(error = %e, "request write failed");
            return;
        }
    }

    if let Err(e) = send.finish() {
        tracing::debug!(error = %e, "stream finish failed");
    }
}

/// Decode server events until the stream ends.
async fn read_events(
    mut recv: RecvStream,
    events: mpsc::Sender<ServerEvent>,
    max_frame_size: usize,
) {
    loop {
        match read_message::<_, ServerEvent>(&mut recv, max_frame_size).await {
            Ok(Some(event)) => {
                if events.send(event).await.is_err() {
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(error = %e, "event stream ended");
                return;
            },
        }
    }
}

/// Client config that accepts any server certificate.
///
/// Development only: the server may be running with a self-signed
/// certificate.
fn insecure_client_config(idle_timeout: Duration) -> Result<ClientConfig, TransportError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    // Must match server's ALPN protocol
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| TransportError::Config(format!("QUIC config error: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(crypto));

    let idle = quinn::IdleTimeout::try_from(idle_timeout)
        .map_err(|e| TransportError::Config(format!("idle timeout out of range: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate.
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_status_maps_codes_to_categories() {
        let normal = CloseStatus { code: Some(0), reason: String::new() };
        assert!(normal.is_normal());
        assert_eq!(normal.category(), None);

        let conflict = CloseStatus {
            code: Some(ErrorCategory::Conflict.code()),
            reason: "user alice already joined room general".to_string(),
        };
        assert!(!conflict.is_normal());
        assert_eq!(conflict.category(), Some(ErrorCategory::Conflict));

        let reset = CloseStatus { code: None, reason: "timed out".to_string() };
        assert_eq!(reset.category(), None);
    }

    #[test]
    fn local_close_has_no_code() {
        let status = CloseStatus::from_error(&ConnectionError::LocallyClosed);
        assert_eq!(status.code, None);
    }

    #[tokio::test]
    async fn unresolvable_address_fails() {
        let result = connect("not a socket address").await;
        assert!(matches!(result, Err(TransportError::Connection(_))));
    }
}
