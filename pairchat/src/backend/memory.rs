//! In-process backend over a shared [`Database`].
//!
//! Each [`MemoryBackend`] is one store session, so two backends on the same
//! database behave like two clients connected to the same store server. The
//! connection "drops" when [`MemoryBackend::disconnect`] is called, which
//! fires the session's disconnect hooks.

use std::collections::BTreeMap;
use std::sync::Arc;

use pairchat_proto::path::Path;
use pairchat_proto::value::Value;
use pairchat_store::database::{Database, DbError, Session};
use tokio::sync::mpsc;

use super::{Backend, BackendError, Connector, Subscription};

impl From<DbError> for BackendError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::WrongPassword => Self::WrongPassword,
            other => Self::Rejected(other.to_string()),
        }
    }
}

/// A session on an in-process [`Database`].
pub struct MemoryBackend {
    db: Arc<Database>,
    session: Session,
}

impl MemoryBackend {
    /// Registers a new session on `db`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::WrongPassword`] if no user has `password`.
    pub async fn connect(db: Arc<Database>, password: &str) -> Result<Self, BackendError> {
        let session = db.register(password).await?;
        Ok(Self { db, session })
    }

    /// Ends the session as if the connection had dropped.
    pub async fn disconnect(&self) {
        self.db.disconnect(&self.session).await;
    }

    /// The database this backend talks to.
    #[must_use]
    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }
}

impl Backend for MemoryBackend {
    fn user(&self) -> &str {
        self.session.user()
    }

    async fn get(&self, path: &Path) -> Result<Value, BackendError> {
        Ok(self.db.get(&self.session, path).await?)
    }

    async fn set(&self, path: &Path, value: Value) -> Result<(), BackendError> {
        Ok(self.db.set(&self.session, path, value).await?)
    }

    async fn update(&self, path: &Path, fields: BTreeMap<String, Value>) -> Result<(), BackendError> {
        Ok(self.db.update(&self.session, path, fields).await?)
    }

    async fn push(&self, path: &Path, value: Value) -> Result<String, BackendError> {
        Ok(self.db.push(&self.session, path, value).await?)
    }

    async fn remove(&self, path: &Path) -> Result<(), BackendError> {
        Ok(self.db.remove(&self.session, path).await?)
    }

    async fn subscribe(&self, path: &Path) -> Result<Subscription, BackendError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.db.subscribe(&self.session, path, tx).await?;
        Ok(Subscription::new(id, rx))
    }

    async fn on_disconnect_set(&self, path: &Path, value: Value) -> Result<(), BackendError> {
        Ok(self.db.on_disconnect_set(&self.session, path, value).await?)
    }
}

/// Connects [`MemoryBackend`]s to one shared database.
#[derive(Clone)]
pub struct MemoryConnector {
    db: Arc<Database>,
}

impl MemoryConnector {
    /// Creates a connector for `db`.
    #[must_use]
    pub const fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

impl Connector for MemoryConnector {
    type Backend = MemoryBackend;

    async fn connect(&self, password: &str) -> Result<MemoryBackend, BackendError> {
        MemoryBackend::connect(Arc::clone(&self.db), password).await
    }
}
