//! Store backend abstraction for `PairChat`.
//!
//! Defines the [`Backend`] trait that every way of reaching the realtime
//! store must satisfy, and the [`Connector`] trait that produces an
//! authenticated backend from a password.
//!
//! Implementations:
//! - [`memory::MemoryBackend`]: an in-process [`Database`] session, used by
//!   tests and embedded setups
//! - [`remote::RemoteBackend`]: a WebSocket connection to a store server
//!
//! [`Database`]: pairchat_store::database::Database

pub mod memory;
pub mod remote;

use std::collections::BTreeMap;
use std::future::Future;

use pairchat_proto::path::Path;
use pairchat_proto::value::Value;
use pairchat_store::database::Snapshot;
use tokio::sync::mpsc;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The store does not know the password.
    #[error("wrong password")]
    WrongPassword,

    /// The store refused the operation.
    #[error("rejected by store: {0}")]
    Rejected(String),

    /// The connection to the store has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("store operation timed out")]
    Timeout,

    /// The store URL could not be used or reached.
    #[error("store {0} is unreachable")]
    Unreachable(String),

    /// The store answered with something other than what was asked for.
    #[error("unexpected store response: {0}")]
    Protocol(String),

    /// An underlying I/O error occurred.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Live view of one store path.
///
/// Yields the full value at the path right after subscribing and again
/// after every change. Dropping the subscription stops delivery. Backends
/// that hand out a release channel are told the id on drop so they can
/// unsubscribe; otherwise the store forgets it the next time it would have
/// delivered.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<Snapshot>,
    release: Option<mpsc::UnboundedSender<u64>>,
}

impl Subscription {
    /// Wraps the receiving end of a snapshot channel.
    #[must_use]
    pub const fn new(id: u64, rx: mpsc::UnboundedReceiver<Snapshot>) -> Self {
        Self {
            id,
            rx,
            release: None,
        }
    }

    /// Like [`Subscription::new`], but sends `id` on `release` when dropped.
    #[must_use]
    pub const fn with_release(
        id: u64,
        rx: mpsc::UnboundedReceiver<Snapshot>,
        release: mpsc::UnboundedSender<u64>,
    ) -> Self {
        Self {
            id,
            rx,
            release: Some(release),
        }
    }

    /// Store-assigned subscription id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Waits for the next value. Returns `None` once the store side is gone.
    pub async fn next(&mut self) -> Option<Value> {
        self.rx.recv().await.map(|snapshot| snapshot.value)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = &self.release {
            if release.send(self.id).is_err() {
                tracing::debug!(sub = self.id, "backend gone, nothing to release");
            }
        }
    }
}

/// Async access to the realtime store on behalf of one user.
///
/// Every call is checked by the store's write rules against [`Backend::user`];
/// refusals come back as [`BackendError::Rejected`].
pub trait Backend: Send + Sync {
    /// Identity the store authenticated this backend as.
    fn user(&self) -> &str;

    /// Reads the value at `path`. Absent keys read as [`Value::Null`].
    fn get(&self, path: &Path) -> impl Future<Output = Result<Value, BackendError>> + Send;

    /// Replaces the value at `path`. Writing [`Value::Null`] deletes.
    fn set(
        &self,
        path: &Path,
        value: Value,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Merges `fields` into the map at `path`, leaving other fields alone.
    fn update(
        &self,
        path: &Path,
        fields: BTreeMap<String, Value>,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Adds `value` under a fresh, time-ordered child key of `path` and
    /// returns that key.
    fn push(
        &self,
        path: &Path,
        value: Value,
    ) -> impl Future<Output = Result<String, BackendError>> + Send;

    /// Deletes the value at `path`.
    fn remove(&self, path: &Path) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Starts a live view of `path`.
    fn subscribe(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<Subscription, BackendError>> + Send;

    /// Asks the store to write `value` at `path` when this connection ends,
    /// however it ends.
    fn on_disconnect_set(
        &self,
        path: &Path,
        value: Value,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// Produces an authenticated [`Backend`] from a password.
pub trait Connector: Send + Sync {
    /// The kind of backend this connector yields.
    type Backend: Backend;

    /// Opens a store connection and authenticates with `password`.
    ///
    /// Returns [`BackendError::WrongPassword`] if the store does not know the
    /// password.
    fn connect(
        &self,
        password: &str,
    ) -> impl Future<Output = Result<Self::Backend, BackendError>> + Send;
}
