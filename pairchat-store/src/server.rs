//! Store server: shared state, WebSocket handler and request dispatch.
//!
//! The server accepts WebSocket connections at `/ws`, authenticates each
//! with a password against the [`Database`] directory, then executes the
//! connection's requests in arrival order. Subscription snapshots are
//! forwarded on the same connection. When the socket closes for any reason
//! the session is disconnected, which fires its disconnect hooks.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use pairchat_proto::wire::{self, Op, Outcome, StoreMessage};
use tokio::sync::{RwLock, mpsc};

use crate::database::{Database, DbError, Session};

/// Default maximum accepted frame size in bytes (64 KB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Shared server state: the database plus the live connection registry.
pub struct StoreState {
    /// The keyspace served by this server.
    pub db: Arc<Database>,
    /// Maps session id to a channel sender for delivering WebSocket messages.
    connections: RwLock<HashMap<u64, mpsc::UnboundedSender<Message>>>,
    /// Maximum accepted frame size in bytes.
    max_payload_size: usize,
}

impl StoreState {
    /// Creates server state around `db` with the default frame size limit.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, db)
    }

    /// Creates server state with a custom frame size limit.
    #[must_use]
    pub fn with_config(max_payload_size: usize, db: Arc<Database>) -> Self {
        Self {
            db,
            connections: RwLock::new(HashMap::new()),
            max_payload_size,
        }
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a WebSocket Close frame to all connected clients.
    ///
    /// Each client's socket then closes, which disconnects its session and
    /// fires its disconnect hooks.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (session, sender) in conns.iter() {
            tracing::info!(session, "sending close frame to client");
            if sender.send(Message::Close(None)).is_err() {
                tracing::debug!(session, "connection already closing");
            }
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Wait for a `Register` message and authenticate its password.
/// 2. Send `Registered` (or `Error` and close on a wrong password).
/// 3. Execute requests in order, answering each with a `Response`.
/// 4. On disconnect, end the session so its disconnect hooks run.
pub async fn handle_socket(socket: WebSocket, state: Arc<StoreState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(password) = wait_for_register(&mut ws_receiver).await else {
        tracing::warn!("connection closed before registration");
        return;
    };

    let session = match state.db.register(&password).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "registration rejected");
            let err = StoreMessage::Error {
                reason: e.to_string(),
            };
            if let Err(e) = send_store_msg(&mut ws_sender, &err).await {
                tracing::debug!(error = %e, "could not report registration failure");
            }
            return;
        }
    };

    let ack = StoreMessage::Registered {
        user: session.user().to_string(),
    };
    if let Err(e) = send_store_msg(&mut ws_sender, &ack).await {
        tracing::error!(session = session.id(), error = %e, "failed to send Registered ack");
        state.db.disconnect(&session).await;
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state
        .connections
        .write()
        .await
        .insert(session.id(), tx.clone());

    // Writer: forwards queued frames to the WebSocket.
    let writer_session = session.id();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(session = writer_session, "WebSocket write failed");
                break;
            }
        }
    });

    // Reader: executes requests in arrival order.
    let reader_session = session.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&reader_session, &data, &reader_state, &tx).await;
                }
                Message::Close(_) => {
                    tracing::info!(session = reader_session.id(), "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.connections.write().await.remove(&session.id());
    state.db.disconnect(&session).await;
}

/// Waits for the first binary frame, expecting a `Register` message.
///
/// Returns the password if one arrives, or `None` if the connection closes
/// or a different message arrives first.
async fn wait_for_register(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match wire::decode(&data) {
                Ok(StoreMessage::Register { password }) => return Some(password),
                Ok(other) => {
                    tracing::warn!(msg = ?other, "expected Register, got different message");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode registration message");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip non-binary frames (ping/pong) during registration.
            }
        }
    }
    None
}

/// Handles a binary frame from a registered client.
async fn handle_binary_message(
    session: &Session,
    data: &[u8],
    state: &Arc<StoreState>,
    out: &mpsc::UnboundedSender<Message>,
) {
    if data.len() > state.max_payload_size {
        tracing::warn!(
            session = session.id(),
            size = data.len(),
            max = state.max_payload_size,
            "frame exceeds size limit"
        );
        let err = StoreMessage::Error {
            reason: format!(
                "payload too large: {} bytes (max {})",
                data.len(),
                state.max_payload_size
            ),
        };
        queue(out, &err);
        return;
    }

    match wire::decode(data) {
        Ok(StoreMessage::Request { id, op }) => {
            handle_request(session, id, op, state, out).await;
        }
        Ok(other) => {
            tracing::warn!(session = session.id(), msg = ?other, "unexpected message type from client");
        }
        Err(e) => {
            tracing::warn!(session = session.id(), error = %e, "failed to decode message");
        }
    }
}

/// Executes one request and queues its response.
///
/// For subscriptions the `Subscribed` response is queued before the first
/// snapshot, so clients always learn the subscription id first.
async fn handle_request(
    session: &Session,
    id: u64,
    op: Op,
    state: &Arc<StoreState>,
    out: &mpsc::UnboundedSender<Message>,
) {
    let db = &state.db;
    let result = match op {
        Op::Get { path } => db.get(session, &path).await.map(Outcome::Value),
        Op::Set { path, value } => db.set(session, &path, value).await.map(|()| Outcome::Done),
        Op::Update { path, fields } => db
            .update(session, &path, fields)
            .await
            .map(|()| Outcome::Done),
        Op::Push { path, value } => db
            .push(session, &path, value)
            .await
            .map(|key| Outcome::Pushed { key }),
        Op::Remove { path } => db.remove(session, &path).await.map(|()| Outcome::Done),
        Op::OnDisconnectSet { path, value } => db
            .on_disconnect_set(session, &path, value)
            .await
            .map(|()| Outcome::Done),
        Op::Unsubscribe { sub } => {
            if !db.unsubscribe(session, sub).await {
                tracing::debug!(session = session.id(), sub, "unsubscribe for unknown subscription");
            }
            Ok(Outcome::Done)
        }
        Op::Subscribe { path } => {
            let (sink, mut snapshots) = mpsc::unbounded_channel();
            match db.subscribe(session, &path, sink).await {
                Ok(sub) => {
                    respond(out, id, Outcome::Subscribed { sub });
                    let forward = out.clone();
                    tokio::spawn(async move {
                        while let Some(snapshot) = snapshots.recv().await {
                            let msg = StoreMessage::Snapshot {
                                sub: snapshot.sub,
                                value: snapshot.value,
                            };
                            if !queue(&forward, &msg) {
                                break;
                            }
                        }
                    });
                    return;
                }
                Err(e) => Err(e),
            }
        }
    };

    let outcome = result.unwrap_or_else(|e: DbError| {
        tracing::debug!(session = session.id(), request = id, error = %e, "request rejected");
        Outcome::Rejected {
            reason: e.to_string(),
        }
    });
    respond(out, id, outcome);
}

fn respond(out: &mpsc::UnboundedSender<Message>, id: u64, outcome: Outcome) {
    queue(out, &StoreMessage::Response { id, outcome });
}

/// Encodes `msg` and queues it for the writer. Returns `false` once the
/// writer has gone away.
fn queue(out: &mpsc::UnboundedSender<Message>, msg: &StoreMessage) -> bool {
    match wire::encode(msg) {
        Ok(bytes) => out.send(Message::Binary(bytes.into())).is_ok(),
        Err(e) => {
            tracing::error!(error = %e, "failed to encode store message");
            true
        }
    }
}

/// Encodes and sends a store message directly on a WebSocket sender.
async fn send_store_msg(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &StoreMessage,
) -> Result<(), String> {
    let bytes = wire::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the store server on the given address around an existing
/// database and returns the bound address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
    db: Arc<Database>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(StoreState::new(db))).await
}

/// Starts the store server with a pre-configured [`StoreState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<StoreState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "store server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<StoreState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
