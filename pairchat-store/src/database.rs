//! In-memory realtime database.
//!
//! The [`Database`] holds the whole keyspace as one [`Value`] tree behind a
//! single lock. Clients act through a [`Session`] obtained by registering
//! with a password; every operation is checked by [`crate::rules`] against
//! the session's user before it is applied. Subscriptions receive a
//! [`Snapshot`] of their path right away and again after every write that
//! changes it. Disconnect hooks registered by a session are written when the
//! session disconnects.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use pairchat_proto::chat_id::{ChatId, ChatIdError};
use pairchat_proto::path::{Path, PathError};
use pairchat_proto::value::Value;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::rules::{self, RuleViolation, WriteKind};

/// Errors returned by database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// No user has the given password.
    #[error("wrong password")]
    WrongPassword,

    /// The operation was refused by the keyspace rules.
    #[error(transparent)]
    Rule(#[from] RuleViolation),

    /// A key or field name is not a valid path segment.
    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    /// A directory entry maps to a malformed chat id.
    #[error("invalid chat pairing in directory: {0}")]
    ChatId(#[from] ChatIdError),
}

/// Seed content for the `passwords` and `chatPairs` directories.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct Directory {
    /// User identifier to plaintext password.
    pub passwords: BTreeMap<String, String>,
    /// Chat code to chat id.
    pub chat_pairs: BTreeMap<String, String>,
}

/// An authenticated connection to the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    id: u64,
    user: String,
}

impl Session {
    /// Identity this session acts as.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Unique connection number.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

/// A subscription update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Subscription id returned by [`Database::subscribe`].
    pub sub: u64,
    /// Full value at the subscribed path.
    pub value: Value,
}

struct Subscription {
    session: u64,
    path: Path,
    sink: mpsc::UnboundedSender<Snapshot>,
}

#[derive(Default)]
struct State {
    root: Value,
    subscriptions: HashMap<u64, Subscription>,
    disconnect_hooks: HashMap<u64, BTreeMap<Path, Value>>,
    last_push: u128,
}

/// The realtime keyspace.
pub struct Database {
    state: RwLock<State>,
    next_id: AtomicU64,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Creates an empty database. Nobody can register until a directory is
    /// seeded.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Creates a database whose directories hold `directory`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Path`] if a user or chat code is not a valid key,
    /// or [`DbError::ChatId`] if a chat pairing is malformed.
    pub fn with_directory(directory: &Directory) -> Result<Self, DbError> {
        let mut root = Value::Null;
        let passwords = Path::passwords();
        for (user, password) in &directory.passwords {
            root.set(&passwords.child(user)?, Value::from(password.as_str()));
        }
        for (code, chat) in &directory.chat_pairs {
            let chat = ChatId::parse(chat)?;
            root.set(&Path::chat_pair(code)?, Value::from(chat.as_str()));
        }
        Ok(Self {
            state: RwLock::new(State {
                root,
                ..State::default()
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Opens a session for the user whose password matches.
    ///
    /// If several users share a password, the first in key order wins.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::WrongPassword`] if no user matches.
    pub async fn register(&self, password: &str) -> Result<Session, DbError> {
        let state = self.state.read().await;
        let user = state
            .root
            .get(&Path::passwords())
            .as_map()
            .into_iter()
            .flatten()
            .find(|(_, stored)| stored.as_text() == Some(password))
            .map(|(user, _)| user.clone())
            .ok_or(DbError::WrongPassword)?;
        drop(state);

        let session = Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            user,
        };
        tracing::info!(session = session.id, user = %session.user, "session registered");
        Ok(session)
    }

    /// Reads the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rule`] if the session may not read `path`.
    pub async fn get(&self, session: &Session, path: &Path) -> Result<Value, DbError> {
        rules::authorize_read(&session.user, path)?;
        let state = self.state.read().await;
        Ok(state.root.get(path).clone())
    }

    /// Replaces the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rule`] if the write is not allowed.
    pub async fn set(&self, session: &Session, path: &Path, value: Value) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        commit(&mut state, &session.user, path, WriteKind::Set, value.normalized())
    }

    /// Merges `fields` into the record at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Path`] for a field name that is not a valid
    /// segment, or [`DbError::Rule`] if the update is not allowed.
    pub async fn update(
        &self,
        session: &Session,
        path: &Path,
        fields: BTreeMap<String, Value>,
    ) -> Result<(), DbError> {
        for key in fields.keys() {
            path.child(key)?;
        }
        let mut state = self.state.write().await;
        let mut after = state.root.get(path).clone();
        after.merge(&Path::root(), fields);
        commit(&mut state, &session.user, path, WriteKind::Update, after)
    }

    /// Appends `value` under a new push key and returns the key.
    ///
    /// Keys are strictly increasing, so lexical key order is insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rule`] if the append is not allowed.
    pub async fn push(&self, session: &Session, path: &Path, value: Value) -> Result<String, DbError> {
        let mut state = self.state.write().await;
        let key = next_push_key(&mut state.last_push);
        let target = path.child(&key)?;
        commit(&mut state, &session.user, &target, WriteKind::Push, value.normalized())?;
        Ok(key)
    }

    /// Deletes the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rule`] if the delete is not allowed.
    pub async fn remove(&self, session: &Session, path: &Path) -> Result<(), DbError> {
        let mut state = self.state.write().await;
        commit(&mut state, &session.user, path, WriteKind::Remove, Value::Null)
    }

    /// Subscribes `sink` to `path` and returns the subscription id.
    ///
    /// The current value is delivered immediately. The subscription lives
    /// until [`unsubscribe`](Self::unsubscribe), the session disconnects, or
    /// the receiving end of `sink` is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rule`] if the session may not read `path`.
    pub async fn subscribe(
        &self,
        session: &Session,
        path: &Path,
        sink: mpsc::UnboundedSender<Snapshot>,
    ) -> Result<u64, DbError> {
        rules::authorize_read(&session.user, path)?;
        let sub = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;
        let initial = Snapshot {
            sub,
            value: state.root.get(path).clone(),
        };
        if sink.send(initial).is_err() {
            tracing::debug!(
                session = session.id,
                sub,
                path = %path,
                "subscriber gone before initial snapshot"
            );
        }
        state.subscriptions.insert(
            sub,
            Subscription {
                session: session.id,
                path: path.clone(),
                sink,
            },
        );
        tracing::debug!(session = session.id, sub, path = %path, "subscribed");
        Ok(sub)
    }

    /// Cancels a subscription owned by `session`. Returns whether it existed.
    pub async fn unsubscribe(&self, session: &Session, sub: u64) -> bool {
        let mut state = self.state.write().await;
        match state.subscriptions.get(&sub) {
            Some(s) if s.session == session.id => state.subscriptions.remove(&sub).is_some(),
            _ => false,
        }
    }

    /// Registers a write of `value` at `path` to happen when `session`
    /// disconnects. A later hook for the same path replaces the earlier one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Rule`] if the session could not perform that write
    /// itself.
    pub async fn on_disconnect_set(
        &self,
        session: &Session,
        path: &Path,
        value: Value,
    ) -> Result<(), DbError> {
        let value = value.normalized();
        let mut state = self.state.write().await;
        let before = state.root.get(path).clone();
        rules::authorize_write(&session.user, path, WriteKind::Set, &before, &value)?;
        state
            .disconnect_hooks
            .entry(session.id)
            .or_default()
            .insert(path.clone(), value);
        Ok(())
    }

    /// Ends `session`: runs its disconnect hooks and drops its subscriptions.
    pub async fn disconnect(&self, session: &Session) {
        let mut state = self.state.write().await;
        state.subscriptions.retain(|_, s| s.session != session.id);
        let hooks = state.disconnect_hooks.remove(&session.id).unwrap_or_default();
        for (path, value) in hooks {
            if let Err(e) = commit(&mut state, &session.user, &path, WriteKind::Set, value) {
                tracing::warn!(session = session.id, path = %path, error = %e, "disconnect hook failed");
            }
        }
        tracing::info!(session = session.id, user = %session.user, "session disconnected");
    }

    /// Reads `path` without rule checks. For operators and tests.
    pub async fn peek(&self, path: &Path) -> Value {
        self.state.read().await.root.get(path).clone()
    }

    /// Number of live subscriptions across all sessions.
    pub async fn subscription_count(&self) -> usize {
        self.state.read().await.subscriptions.len()
    }
}

/// Checks and applies one write, then notifies every subscription whose
/// value changed.
fn commit(
    state: &mut State,
    user: &str,
    target: &Path,
    kind: WriteKind,
    after: Value,
) -> Result<(), DbError> {
    let before = state.root.get(target);
    rules::authorize_write(user, target, kind, before, &after)?;

    let watchers: Vec<(u64, Value)> = state
        .subscriptions
        .iter()
        .filter(|(_, s)| s.path.overlaps(target))
        .map(|(id, s)| (*id, state.root.get(&s.path).clone()))
        .collect();

    state.root.set(target, after);
    tracing::debug!(user, path = %target, ?kind, "write committed");

    let mut closed = Vec::new();
    for (id, old) in watchers {
        let Some(sub) = state.subscriptions.get(&id) else {
            continue;
        };
        let new = state.root.get(&sub.path);
        if *new != old
            && sub
                .sink
                .send(Snapshot {
                    sub: id,
                    value: new.clone(),
                })
                .is_err()
        {
            closed.push(id);
        }
    }
    for id in closed {
        state.subscriptions.remove(&id);
    }
    Ok(())
}

/// Returns a time-ordered key strictly greater than any issued before.
fn next_push_key(last: &mut u128) -> String {
    let candidate = Uuid::now_v7().as_u128();
    let next = candidate.max(last.saturating_add(1));
    *last = next;
    Uuid::from_u128(next).to_string()
}
