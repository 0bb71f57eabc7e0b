//! One TCP (or TLS) session per cluster endpoint (spec.md §4.1).
//!
//! Reads run on a dedicated pump task; writes are serialized by a
//! `tokio::sync::Mutex` — the same split RustyDB's
//! `src/networking/transport/tcp.rs` uses between `AsyncReadExt`/
//! `AsyncWriteExt` halves, and its pending-request table mirrors
//! `src/networking/routing/router.rs`'s `PendingRequest` map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::protocol::{encode_request, HandshakeRequest, HandshakeResponse};
use crate::types::{AffinityTopologyVersion, Endpoint, NodeId};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Lifecycle of a [`NodeSession`] (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Closed,
}

/// Notifications the session raises for the connection pool, replacing
/// RustyDB's closure-based event callbacks with a channel so the session
/// holds no back-reference to the pool (spec.md §9, "back-references and
/// lifetimes").
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Disconnected {
        endpoint: Endpoint,
        node_id: Option<NodeId>,
    },
    TopologyChanged(AffinityTopologyVersion),
}

struct PendingRequest {
    response_tx: oneshot::Sender<Result<Bytes>>,
}

/// A single session to one cluster endpoint (spec.md §4.1).
pub struct NodeSession {
    endpoint: Endpoint,
    node_id: SyncMutex<Option<NodeId>>,
    state: SyncMutex<SessionState>,
    partition_aware: AtomicBool,
    next_request_id: AtomicI64,
    pending: Arc<SyncMutex<HashMap<i64, PendingRequest>>>,
    writer: AsyncMutex<BoxedWriter>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

fn split_boxed<T>(stream: T) -> (BoxedReader, BoxedWriter)
where
    T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (r, w) = tokio::io::split(stream);
    (Box::new(r), Box::new(w))
}

/// Upgrade the raw socket to TLS if `config.use_tls` asks for it (spec.md
/// §6), otherwise split it as plain TCP. Both paths produce the same boxed
/// reader/writer pair so the handshake and read pump below never need to
/// know which one they got.
async fn open_transport(stream: TcpStream, endpoint: &Endpoint, config: &ClientConfig) -> Result<(BoxedReader, BoxedWriter)> {
    if config.use_tls {
        #[cfg(feature = "tls")]
        {
            let host = endpoint.rsplit_once(':').map(|(h, _)| h).unwrap_or(endpoint.as_str());
            return tls::upgrade(stream, host, config.tls_options.as_ref()).await;
        }
        #[cfg(not(feature = "tls"))]
        {
            return Err(ClientError::IllegalArgument(
                "useTLS is set but this build was compiled without the `tls` feature".to_string(),
            ));
        }
    }
    Ok(split_boxed(stream))
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::Arc;

    use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
    use tokio::net::TcpStream;
    use tokio_rustls::TlsConnector;

    use crate::config::TlsOptions;
    use crate::error::{ClientError, Result};

    use super::{split_boxed, BoxedReader, BoxedWriter};

    /// Grounded on the teacher's `src/networking/security/tls.rs`
    /// `build_client_config`: an empty root store unless a CA cert path is
    /// configured, client auth only when both a client cert and key path
    /// are given.
    pub async fn upgrade(stream: TcpStream, host: &str, options: Option<&TlsOptions>) -> Result<(BoxedReader, BoxedWriter)> {
        let config = build_client_config(options)?;
        let connector = TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| ClientError::ConnectionFailed(format!("invalid TLS server name '{host}': {e}")))?;
        let tls_stream = connector
            .connect(server_name, stream)
            .await
            .map_err(|e| ClientError::ConnectionFailed(format!("TLS handshake with {host}: {e}")))?;
        Ok(split_boxed(tls_stream))
    }

    fn build_client_config(options: Option<&TlsOptions>) -> Result<rustls::ClientConfig> {
        let mut roots = rustls::RootCertStore::empty();
        if let Some(path) = options.and_then(|o| o.ca_cert_path.as_deref()) {
            for cert in load_certs(path)? {
                roots
                    .add(cert)
                    .map_err(|e| ClientError::ConnectionFailed(format!("adding CA cert {path}: {e}")))?;
            }
        }

        let builder = rustls::ClientConfig::builder().with_root_certificates(roots);

        let client_cert = options.and_then(|o| o.client_cert_path.as_deref().zip(o.client_key_path.as_deref()));
        let config = match client_cert {
            Some((cert_path, key_path)) => {
                let certs = load_certs(cert_path)?;
                let key = load_private_key(key_path)?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ClientError::ConnectionFailed(format!("client certificate {cert_path}: {e}")))?
            }
            None => builder.with_no_client_auth(),
        };
        Ok(config)
    }

    fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
        let file = std::fs::File::open(path).map_err(|e| ClientError::ConnectionFailed(format!("opening {path}: {e}")))?;
        let mut reader = std::io::BufReader::new(file);
        rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ClientError::ConnectionFailed(format!("parsing {path}: {e}")))
    }

    fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
        let open = || std::fs::File::open(path).map_err(|e| ClientError::ConnectionFailed(format!("opening {path}: {e}")));

        let mut reader = std::io::BufReader::new(open()?);
        let mut pkcs8 = rustls_pemfile::pkcs8_private_keys(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ClientError::ConnectionFailed(format!("parsing PKCS8 key {path}: {e}")))?;
        if !pkcs8.is_empty() {
            return Ok(PrivateKeyDer::Pkcs8(pkcs8.remove(0)));
        }

        let mut reader = std::io::BufReader::new(open()?);
        let mut rsa = rustls_pemfile::rsa_private_keys(&mut reader)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ClientError::ConnectionFailed(format!("parsing RSA key {path}: {e}")))?;
        if !rsa.is_empty() {
            return Ok(PrivateKeyDer::Pkcs1(rsa.remove(0)));
        }

        Err(ClientError::ConnectionFailed(format!("no private key found in {path}")))
    }
}

impl NodeSession {
    /// `connect() -> Result<()>`: open TCP, perform handshake (spec.md §4.1).
    pub async fn connect(
        endpoint: Endpoint,
        config: &ClientConfig,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<Arc<NodeSession>> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| ClientError::ConnectionFailed(format!("connect to {endpoint} timed out")))?
            .map_err(|e| ClientError::ConnectionFailed(format!("{endpoint}: {e}")))?;
        let _ = stream.set_nodelay(true);

        let (mut reader, writer) = open_transport(stream, &endpoint, config).await?;

        let session = Arc::new(NodeSession {
            endpoint: endpoint.clone(),
            node_id: SyncMutex::new(None),
            state: SyncMutex::new(SessionState::Connecting),
            partition_aware: AtomicBool::new(false),
            next_request_id: AtomicI64::new(1),
            pending: Arc::new(SyncMutex::new(HashMap::new())),
            writer: AsyncMutex::new(writer),
            events,
        });

        *session.state.lock() = SessionState::Handshaking;
        let (node_id, partition_aware) = handshake_with_reader(&mut reader, &session.writer, config).await?;
        *session.node_id.lock() = node_id;
        session.partition_aware.store(partition_aware, Ordering::Relaxed);
        *session.state.lock() = SessionState::Ready;

        let pending = session.pending.clone();
        let events_tx = session.events.clone();
        let endpoint_for_pump = endpoint.clone();
        let session_for_pump = Arc::clone(&session);
        tokio::spawn(async move {
            run_read_pump(
                reader,
                pending,
                partition_aware,
                events_tx,
                endpoint_for_pump,
                node_id,
                session_for_pump,
            )
            .await;
        });

        tracing::info!(endpoint = %session.endpoint, node_id = ?node_id, partition_aware, "session ready");
        Ok(session)
    }
}

/// Real handshake implementation, taking the reader explicitly since it
/// must run before the read pump owns it.
async fn handshake_with_reader(
    reader: &mut BoxedReader,
    writer: &AsyncMutex<BoxedWriter>,
    config: &ClientConfig,
) -> Result<(Option<NodeId>, bool)> {
    let request = HandshakeRequest {
        user_name: config.user_name.clone(),
        password: config.password.clone(),
        partition_awareness_requested: config.partition_awareness,
    };
    let body = request.encode();

    {
        let mut writer = writer.lock().await;
        writer
            .write_i32_le(body.len() as i32)
            .await
            .map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        writer.write_all(&body).await.map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
        writer.flush().await.map_err(|e| ClientError::ConnectionFailed(e.to_string()))?;
    }

    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| ClientError::HandshakeFailed(e.to_string()))?;
    let len = i32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| ClientError::HandshakeFailed(e.to_string()))?;

    let response = HandshakeResponse::decode(&body)?;
    if !response.success {
        return Err(ClientError::HandshakeFailed(
            response.error_message.unwrap_or_else(|| "rejected".to_string()),
        ));
    }

    let partition_aware = config.partition_awareness && response.partition_awareness_supported();
    Ok((response.node_id, partition_aware))
}

#[allow(clippy::too_many_arguments)]
async fn run_read_pump(
    mut reader: BoxedReader,
    pending: Arc<SyncMutex<HashMap<i64, PendingRequest>>>,
    partition_aware: bool,
    events: mpsc::UnboundedSender<SessionEvent>,
    endpoint: Endpoint,
    node_id: Option<NodeId>,
    session: Arc<NodeSession>,
) {
    loop {
        match read_one_frame(&mut reader, partition_aware).await {
            Ok((request_id, status, body, topology_change)) => {
                if let Some(version) = topology_change {
                    let _ = events.send(SessionEvent::TopologyChanged(version));
                }
                let sender = pending.lock().remove(&request_id);
                if let Some(pending_request) = sender {
                    let result = if status == 0 {
                        Ok(Bytes::from(body))
                    } else {
                        let message = String::from_utf8_lossy(&body).into_owned();
                        Err(ClientError::OperationError { code: status, message })
                    };
                    let _ = pending_request.response_tx.send(result);
                }
            }
            Err(_) => {
                *session.state.lock() = SessionState::Closed;
                fail_all_pending(&pending);
                let _ = events.send(SessionEvent::Disconnected { endpoint, node_id });
                tracing::warn!(endpoint = %session.endpoint, "session read pump exiting, connection lost");
                return;
            }
        }
    }
}

async fn read_one_frame(
    reader: &mut BoxedReader,
    partition_aware: bool,
) -> std::io::Result<(i64, i32, Vec<u8>, Option<AffinityTopologyVersion>)> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = i32::from_le_bytes(len_buf) as usize;
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;

    let (header, body) = crate::protocol::decode_response_header(&frame, partition_aware)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    Ok((header.request_id, header.status, body.to_vec(), header.topology_change))
}

fn fail_all_pending(pending: &SyncMutex<HashMap<i64, PendingRequest>>) {
    let mut map = pending.lock();
    for (_, pending_request) in map.drain() {
        let _ = pending_request
            .response_tx
            .send(Err(ClientError::LostConnection("connection closed".to_string())));
    }
}

impl NodeSession {
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn node_id(&self) -> Option<NodeId> {
        *self.node_id.lock()
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn is_partition_aware(&self) -> bool {
        self.partition_aware.load(Ordering::Relaxed)
    }

    /// `sendRequest(opCode, writer, reader) -> Result<()>` (spec.md §4.1).
    ///
    /// `writer` fills the request body; `reader` parses the response body
    /// on success. Fails with [`ClientError::LostConnection`] if the
    /// socket dies while the request is outstanding, or
    /// [`ClientError::OperationError`] if the server reports non-zero
    /// status.
    pub async fn send_request<W, R, T>(&self, op_code: i16, writer: W, reader: R, timeout: Option<Duration>) -> Result<T>
    where
        W: FnOnce(&mut Vec<u8>),
        R: FnOnce(&[u8]) -> Result<T>,
    {
        if self.state() == SessionState::Closed {
            return Err(ClientError::LostConnection(format!("{} already closed", self.endpoint)));
        }

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let mut body = Vec::new();
        writer(&mut body);
        let frame = encode_request(op_code, request_id, &body);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, PendingRequest { response_tx: tx });

        {
            let mut w = self.writer.lock().await;
            if let Err(e) = w.write_all(&frame).await {
                self.pending.lock().remove(&request_id);
                return Err(ClientError::LostConnection(e.to_string()));
            }
            if let Err(e) = w.flush().await {
                self.pending.lock().remove(&request_id);
                return Err(ClientError::LostConnection(e.to_string()));
            }
        }

        let response_bytes = match timeout {
            Some(duration) => tokio::time::timeout(duration, rx)
                .await
                .map_err(|_| ClientError::LostConnection(format!("request {request_id} timed out")))?
                .map_err(|_| ClientError::LostConnection("session closed while request outstanding".to_string()))??,
            None => rx
                .await
                .map_err(|_| ClientError::LostConnection("session closed while request outstanding".to_string()))??,
        };

        reader(&response_bytes)
    }

    /// `disconnect()`: close the socket, fail all pending slots with
    /// `LostConnection` (spec.md §4.1).
    pub async fn disconnect(&self) {
        *self.state.lock() = SessionState::Closed;
        fail_all_pending(&self.pending);
        {
            let mut w = self.writer.lock().await;
            let _ = w.shutdown().await;
        }
        let _ = self.events.send(SessionEvent::Disconnected {
            endpoint: self.endpoint.clone(),
            node_id: self.node_id(),
        });
    }
}
