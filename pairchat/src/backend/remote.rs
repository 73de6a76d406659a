//! WebSocket backend for a `pairchat-store` server.
//!
//! Speaks the postcard-encoded [`StoreMessage`] protocol over WebSocket
//! binary frames. Requests carry a client-chosen id and are matched to
//! their `Response` by a background reader task, which also routes
//! subscription snapshots to their [`Subscription`]. Dropping a
//! [`Subscription`] hands its id to a release task that forgets the sink and
//! sends `Unsubscribe`, so the store stops forwarding to it.
//!
//! The store fires this connection's disconnect hooks when the socket goes
//! away, whether through [`RemoteBackend::close`], a drop of the backend, or
//! a network failure.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pairchat_proto::path::Path;
use pairchat_proto::value::Value;
use pairchat_proto::wire::{self, Op, Outcome, StoreMessage};
use pairchat_store::database::Snapshot;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Backend, BackendError, Connector, Subscription};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Timeouts applied by [`RemoteBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Timeout for opening the WebSocket connection.
    pub connect_timeout: Duration,
    /// Timeout for the `Registered` acknowledgment.
    pub register_timeout: Duration,
    /// Timeout for each request's `Response`.
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            register_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A request waiting for its `Response`.
struct Pending {
    reply: oneshot::Sender<Outcome>,
    /// Set for `Subscribe` requests; registered by the reader before any
    /// snapshot for the new subscription is read.
    sink: Option<mpsc::UnboundedSender<Snapshot>>,
}

/// State shared between the backend, its reader task and its release task.
struct Shared {
    /// Write half of the WebSocket connection.
    ws_sender: Mutex<WsSender>,
    pending: parking_lot::Mutex<HashMap<u64, Pending>>,
    subscriptions: parking_lot::Mutex<HashMap<u64, mpsc::UnboundedSender<Snapshot>>>,
    connected: AtomicBool,
    /// Next request id.
    next_id: AtomicU64,
}

impl Shared {
    fn new(ws_sender: WsSender) -> Self {
        Self {
            ws_sender: Mutex::new(ws_sender),
            pending: parking_lot::Mutex::default(),
            subscriptions: parking_lot::Mutex::default(),
            connected: AtomicBool::new(true),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers `pending` under a fresh id and writes the request frame.
    ///
    /// On a send failure the pending entry is removed again and the
    /// connection is marked closed.
    async fn send_request(&self, op: Op, pending: Pending) -> Result<u64, BackendError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let bytes = wire::encode(&StoreMessage::Request { id, op })
            .map_err(|e| BackendError::Io(std::io::Error::other(e)))?;
        self.pending.lock().insert(id, pending);

        let sent = self
            .ws_sender
            .lock()
            .await
            .send(Message::Binary(bytes.into()))
            .await;
        if let Err(e) = sent {
            tracing::warn!(err = %e, "store send failed");
            self.pending.lock().remove(&id);
            self.connected.store(false, Ordering::Relaxed);
            return Err(BackendError::ConnectionClosed);
        }
        Ok(id)
    }
}

/// Store backend over a WebSocket connection.
///
/// Created via [`RemoteBackend::connect`], which opens the connection,
/// authenticates, and spawns the background reader task.
pub struct RemoteBackend {
    /// Identity the store authenticated us as.
    user: String,
    /// The store URL (ws:// or wss://).
    store_url: String,
    /// Socket writer, pending requests, live subscriptions and the
    /// connection flag.
    shared: Arc<Shared>,
    /// How long to wait for each response.
    request_timeout: Duration,
    /// Receives the ids of dropped [`Subscription`]s.
    release: mpsc::UnboundedSender<u64>,
    /// Handle to the background reader task; aborted on drop.
    reader_handle: tokio::task::JoinHandle<()>,
    /// Handle to the task that unsubscribes released ids; aborted on drop.
    release_handle: tokio::task::JoinHandle<()>,
}

impl RemoteBackend {
    /// Connect to a store server and authenticate with `password`.
    ///
    /// Performs the following steps:
    /// 1. Validates `store_url` (must be `ws://` or `wss://` with a host)
    /// 2. Establishes a WebSocket connection (connect timeout)
    /// 3. Sends `Register { password }`
    /// 4. Waits for `Registered { user }` (register timeout)
    /// 5. Spawns background tasks to read responses and snapshots and to
    ///    unsubscribe dropped subscriptions
    ///
    /// # Errors
    ///
    /// - [`BackendError::Unreachable`] if the URL is invalid or refuses connections.
    /// - [`BackendError::Timeout`] if connection or registration times out.
    /// - [`BackendError::WrongPassword`] if the store rejects the password.
    /// - [`BackendError::Io`] / [`BackendError::Protocol`] for other failures.
    pub async fn connect(
        store_url: &str,
        password: &str,
        config: RemoteConfig,
    ) -> Result<Self, BackendError> {
        validate_url(store_url)?;

        let (ws_stream, _response) =
            tokio::time::timeout(config.connect_timeout, connect_async(store_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = store_url, "store WebSocket connect timed out");
                    BackendError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = store_url, err = %e, "store WebSocket connect failed");
                    map_ws_connect_error(store_url, e)
                })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let register = StoreMessage::Register {
            password: password.to_string(),
        };
        let register_bytes =
            wire::encode(&register).map_err(|e| BackendError::Io(std::io::Error::other(e)))?;
        ws_sender
            .send(Message::Binary(register_bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "failed to send Register message");
                BackendError::ConnectionClosed
            })?;

        let ack = tokio::time::timeout(config.register_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = store_url, "store registration acknowledgment timed out");
                BackendError::Timeout
            })?;

        let user = match ack {
            Some(Ok(Message::Binary(data))) => match wire::decode(&data) {
                Ok(StoreMessage::Registered { user }) => {
                    tracing::info!(user = %user, url = store_url, "registered with store");
                    user
                }
                Ok(StoreMessage::Error { reason }) => {
                    tracing::warn!(reason = %reason, "store registration rejected");
                    return Err(if reason.contains("wrong password") {
                        BackendError::WrongPassword
                    } else {
                        BackendError::Rejected(reason)
                    });
                }
                Ok(other) => {
                    tracing::warn!(?other, "unexpected store response during registration");
                    return Err(BackendError::Protocol(
                        "unexpected response during registration".to_string(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed store registration response");
                    return Err(BackendError::Protocol(format!(
                        "malformed registration response: {e}"
                    )));
                }
            },
            Some(Ok(Message::Close(_))) | None => {
                tracing::warn!("store closed connection during registration");
                return Err(BackendError::ConnectionClosed);
            }
            Some(Ok(_)) => {
                return Err(BackendError::Protocol(
                    "unexpected non-binary frame during registration".to_string(),
                ));
            }
            Some(Err(e)) => {
                tracing::warn!(err = %e, "WebSocket error during registration");
                return Err(BackendError::Io(std::io::Error::other(format!(
                    "WebSocket error during registration: {e}"
                ))));
            }
        };

        let shared = Arc::new(Shared::new(ws_sender));
        let reader_handle = tokio::spawn(reader_loop(ws_reader, Arc::clone(&shared)));
        let (release, released) = mpsc::unbounded_channel();
        let release_handle = tokio::spawn(release_loop(released, Arc::clone(&shared)));

        Ok(Self {
            user,
            store_url: store_url.to_string(),
            shared,
            request_timeout: config.request_timeout,
            release,
            reader_handle,
            release_handle,
        })
    }

    /// Return the store URL this backend is connected to.
    #[must_use]
    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    /// Whether the WebSocket connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    /// Closes the connection with a WebSocket Close frame.
    pub async fn close(&self) {
        let mut sender = self.shared.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(err = %e, "store close failed");
        }
        self.shared.connected.store(false, Ordering::Relaxed);
    }

    /// Sends one request and waits for its outcome.
    async fn request(
        &self,
        op: Op,
        sink: Option<mpsc::UnboundedSender<Snapshot>>,
    ) -> Result<Outcome, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::ConnectionClosed);
        }

        let (reply, outcome) = oneshot::channel();
        let id = self.shared.send_request(op, Pending { reply, sink }).await?;

        match tokio::time::timeout(self.request_timeout, outcome).await {
            Ok(Ok(Outcome::Rejected { reason })) => Err(BackendError::Rejected(reason)),
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                tracing::warn!(request = id, "store request timed out");
                Err(BackendError::Timeout)
            }
        }
    }
}

impl Drop for RemoteBackend {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.release_handle.abort();
    }
}

impl Backend for RemoteBackend {
    fn user(&self) -> &str {
        &self.user
    }

    async fn get(&self, path: &Path) -> Result<Value, BackendError> {
        match self.request(Op::Get { path: path.clone() }, None).await? {
            Outcome::Value(value) => Ok(value),
            other => Err(unexpected(&other)),
        }
    }

    async fn set(&self, path: &Path, value: Value) -> Result<(), BackendError> {
        let op = Op::Set {
            path: path.clone(),
            value,
        };
        expect_done(self.request(op, None).await?)
    }

    async fn update(&self, path: &Path, fields: BTreeMap<String, Value>) -> Result<(), BackendError> {
        let op = Op::Update {
            path: path.clone(),
            fields,
        };
        expect_done(self.request(op, None).await?)
    }

    async fn push(&self, path: &Path, value: Value) -> Result<String, BackendError> {
        let op = Op::Push {
            path: path.clone(),
            value,
        };
        match self.request(op, None).await? {
            Outcome::Pushed { key } => Ok(key),
            other => Err(unexpected(&other)),
        }
    }

    async fn remove(&self, path: &Path) -> Result<(), BackendError> {
        expect_done(self.request(Op::Remove { path: path.clone() }, None).await?)
    }

    async fn subscribe(&self, path: &Path) -> Result<Subscription, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        match self
            .request(Op::Subscribe { path: path.clone() }, Some(tx))
            .await?
        {
            Outcome::Subscribed { sub } => {
                Ok(Subscription::with_release(sub, rx, self.release.clone()))
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn on_disconnect_set(&self, path: &Path, value: Value) -> Result<(), BackendError> {
        let op = Op::OnDisconnectSet {
            path: path.clone(),
            value,
        };
        expect_done(self.request(op, None).await?)
    }
}

/// Connects [`RemoteBackend`]s to one store URL.
#[derive(Debug, Clone)]
pub struct RemoteConnector {
    store_url: String,
    config: RemoteConfig,
}

impl RemoteConnector {
    /// Creates a connector for `store_url`.
    #[must_use]
    pub fn new(store_url: impl Into<String>, config: RemoteConfig) -> Self {
        Self {
            store_url: store_url.into(),
            config,
        }
    }
}

impl Connector for RemoteConnector {
    type Backend = RemoteBackend;

    async fn connect(&self, password: &str) -> Result<RemoteBackend, BackendError> {
        RemoteBackend::connect(&self.store_url, password, self.config).await
    }
}

/// Background task that reads WebSocket messages and dispatches them.
///
/// Completes pending requests from `Response` frames and forwards
/// `Snapshot` frames to their subscription. Malformed frames are logged and
/// skipped. On exit, marks the connection closed and fails every pending
/// request by dropping its reply channel.
async fn reader_loop(mut ws_reader: WsReader, shared: Arc<Shared>) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match wire::decode(&data) {
                Ok(StoreMessage::Response { id, outcome }) => {
                    let Some(pending) = shared.pending.lock().remove(&id) else {
                        tracing::debug!(request = id, "response for unknown request");
                        continue;
                    };
                    if let (Outcome::Subscribed { sub }, Some(sink)) = (&outcome, pending.sink) {
                        shared.subscriptions.lock().insert(*sub, sink);
                    }
                    if pending.reply.send(outcome).is_err() {
                        tracing::debug!(request = id, "requester no longer waiting");
                    }
                }
                Ok(StoreMessage::Snapshot { sub, value }) => {
                    let mut subs = shared.subscriptions.lock();
                    let delivered = subs
                        .get(&sub)
                        .is_some_and(|sink| sink.send(Snapshot { sub, value }).is_ok());
                    if !delivered {
                        subs.remove(&sub);
                    }
                }
                Ok(StoreMessage::Error { reason }) => {
                    tracing::warn!(reason = %reason, "store error");
                }
                Ok(other) => {
                    tracing::debug!(?other, "unexpected store message type");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("store WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text/raw frames.
            }
            Err(e) => {
                tracing::warn!(err = %e, "store WebSocket read error");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    shared.pending.lock().clear();
    shared.subscriptions.lock().clear();
    tracing::info!("store reader task exiting");
}

/// Background task that unsubscribes dropped subscriptions.
///
/// Forgets the local sink at once, then tells the store so it drops its
/// side. Nothing waits for the store's answer.
async fn release_loop(mut released: mpsc::UnboundedReceiver<u64>, shared: Arc<Shared>) {
    while let Some(sub) = released.recv().await {
        shared.subscriptions.lock().remove(&sub);
        if !shared.connected.load(Ordering::Relaxed) {
            continue;
        }
        let (reply, _) = oneshot::channel();
        let pending = Pending { reply, sink: None };
        match shared.send_request(Op::Unsubscribe { sub }, pending).await {
            Ok(_) => tracing::debug!(sub, "subscription released"),
            Err(e) => tracing::debug!(sub, err = %e, "could not release subscription"),
        }
    }
}

fn expect_done(outcome: Outcome) -> Result<(), BackendError> {
    match outcome {
        Outcome::Done => Ok(()),
        other => Err(unexpected(&other)),
    }
}

fn unexpected(outcome: &Outcome) -> BackendError {
    BackendError::Protocol(format!("{outcome:?}"))
}

/// Accepts only `ws://` and `wss://` URLs with a host.
fn validate_url(store_url: &str) -> Result<(), BackendError> {
    let parsed =
        url::Url::parse(store_url).map_err(|_| BackendError::Unreachable(store_url.to_string()))?;
    if !matches!(parsed.scheme(), "ws" | "wss") || parsed.host_str().is_none() {
        return Err(BackendError::Unreachable(store_url.to_string()));
    }
    Ok(())
}

/// Map a `tokio_tungstenite` connection error to a [`BackendError`].
fn map_ws_connect_error(
    store_url: &str,
    err: tokio_tungstenite::tungstenite::Error,
) -> BackendError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                BackendError::Unreachable(store_url.to_string())
            } else {
                BackendError::Io(io_err)
            }
        }
        WsError::Http(response) => BackendError::Io(std::io::Error::other(format!(
            "store HTTP error: status {}",
            response.status()
        ))),
        other => BackendError::Io(std::io::Error::other(format!(
            "store connection error: {other}"
        ))),
    }
}
