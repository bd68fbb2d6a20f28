//! WebSocket transport for the Cortex JSON-RPC API.
//!
//! One reader task demultiplexes incoming frames: responses complete the
//! pending call with the same `id`, stream frames fan out over a broadcast
//! channel, warnings are logged. Writes go through an unbounded channel to a
//! writer task so `call` only needs `&self`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{Connector, WebSocketStream};

use super::rpc::{classify, Incoming, RpcErrorObject, RpcRequest, StreamEvent};
use super::CortexError;

/// Poll interval while `close(false)` waits for outstanding calls.
pub const DRAIN_STEP: Duration = Duration::from_millis(250);
const MAX_DRAIN_STEPS: u32 = 40;
const STREAM_BUFFER: usize = 256;

type PendingCall = oneshot::Sender<Result<Value, RpcErrorObject>>;
type PendingTable = Arc<Mutex<HashMap<u64, PendingCall>>>;

#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub accept_invalid_certs: bool,
    pub request_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self { accept_invalid_certs: true, request_timeout: Duration::from_secs(10) }
    }
}

pub struct CortexClient {
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingTable,
    streams: broadcast::Sender<StreamEvent>,
    next_id: AtomicU64,
    request_timeout: Duration,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl std::fmt::Debug for CortexClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CortexClient")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl CortexClient {
    /// Open the socket. `ws://` URLs skip TLS entirely.
    pub async fn connect(url: &str, options: ConnectOptions) -> Result<Self, CortexError> {
        let connector = if url.starts_with("wss://") && options.accept_invalid_certs {
            Some(Connector::Rustls(Arc::new(local_tls_config()?)))
        } else {
            None
        };

        let (ws, _response) = tokio_tungstenite::connect_async_tls_with_config(url, None, false, connector)
            .await
            .map_err(|e| CortexError::Connect { url: url.to_string(), reason: e.to_string() })?;

        tracing::info!(%url, "cortex socket opened");
        Ok(Self::from_stream(url, ws, options.request_timeout))
    }

    /// Wrap an already-established socket.
    pub fn from_stream<S>(url: &str, ws: WebSocketStream<S>, request_timeout: Duration) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut source) = ws.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let (streams, _) = broadcast::channel(STREAM_BUFFER);
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(msg) = outgoing_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    tracing::warn!("cortex write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader = {
            let pending = pending.clone();
            let streams = streams.clone();
            let connected = connected.clone();
            tokio::spawn(async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => route_frame(&text, &pending, &streams).await,
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!("cortex read failed: {}", e);
                            break;
                        }
                    }
                }
                connected.store(false, Ordering::SeqCst);
                // Dropping the senders fails every outstanding call with Disconnected.
                pending.lock().await.clear();
                tracing::info!("cortex socket closed");
            })
        };

        Self {
            url: url.to_string(),
            outgoing,
            pending,
            streams,
            next_id: AtomicU64::new(0),
            request_timeout,
            connected,
            reader,
            writer,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Receive stream frames published after this call.
    pub fn stream_events(&self) -> broadcast::Receiver<StreamEvent> {
        self.streams.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send one request and wait for the response with the same id.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CortexError> {
        if !self.is_connected() {
            return Err(CortexError::Disconnected);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let text = serde_json::to_string(&RpcRequest::new(id, method, params))
            .map_err(|e| CortexError::Serialization { error: e.to_string() })?;
        tracing::debug!(id, method, "cortex request");

        if self.outgoing.send(Message::Text(text)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(CortexError::Disconnected);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(CortexError::Rpc { method: method.to_string(), code: e.code, message: e.message }),
            Ok(Err(_)) => Err(CortexError::Disconnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(CortexError::Timeout {
                    method: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Close the socket. Without `force`, outstanding calls get a bounded
    /// number of `DRAIN_STEP` waits to finish first.
    pub async fn close(&self, force: bool) {
        if !force {
            for _ in 0..MAX_DRAIN_STEPS {
                if self.pending_count().await == 0 {
                    break;
                }
                tokio::time::sleep(DRAIN_STEP).await;
            }
        }
        let _ = self.outgoing.send(Message::Close(None));
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Drop for CortexClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn route_frame(text: &str, pending: &PendingTable, streams: &broadcast::Sender<StreamEvent>) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("cortex sent invalid json: {}", e);
            return;
        }
    };

    match classify(frame) {
        Incoming::Response { id, result } => match pending.lock().await.remove(&id) {
            Some(tx) => {
                let _ = tx.send(result);
            }
            None => tracing::warn!(id, "response for unknown or expired request"),
        },
        Incoming::Stream(event) => {
            // No receivers simply means nobody is listening to this stream right now.
            let _ = streams.send(event);
        }
        Incoming::Warning { code, message } => tracing::warn!(code, %message, "cortex warning"),
        Incoming::Unknown(frame) => tracing::debug!(%frame, "unhandled cortex frame"),
    }
}

/// TLS config for the local Cortex service, whose certificate is self-signed.
fn local_tls_config() -> Result<ClientConfig, CortexError> {
    let provider = Arc::new(ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| CortexError::Tls { reason: e.to_string() })?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptLocalCertificate(provider)))
        .with_no_client_auth();
    Ok(config)
}

/// Accepts any server certificate but still checks handshake signatures.
#[derive(Debug)]
struct AcceptLocalCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptLocalCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
