//! Message synchronization for one chat.
//!
//! [`MessageLog`] appends, edits and deletes records under
//! `messages/{chatId}`. [`MessageFeed`] is the live, key-ordered view of that
//! subtree; every time it yields, it also marks the other participant's
//! unread messages as read.
//!
//! Edit and delete checks run here first so the user gets a clear error,
//! and again inside the store, which is what actually enforces them.

use std::future::Future;
use std::sync::Arc;

use pairchat_proto::chat_id::ChatId;
use pairchat_proto::message::{self, Message, MessageEntry, Timestamp, ValidationError};
use pairchat_proto::path::{Path, PathError};

use crate::backend::{Backend, BackendError, Subscription};

/// Errors from message operations.
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    /// The content is empty or too large.
    #[error("invalid message: {0}")]
    Validation(#[from] ValidationError),

    /// Only the author may edit or delete a message.
    #[error("only the author can {action} this message")]
    NotAuthor {
        /// What was attempted ("edit" or "delete").
        action: &'static str,
    },

    /// A message can be edited once.
    #[error("this message has already been edited")]
    AlreadyEdited,

    /// No message exists under the key.
    #[error("message {0} not found")]
    NotFound(String),

    /// The message key or chat id does not form a valid store path.
    #[error("invalid message key: {0}")]
    Path(#[from] PathError),

    /// The store refused the operation or could not be reached.
    #[error("store error: {0}")]
    Backend(#[from] BackendError),
}

/// Asks the user to confirm a destructive action.
pub trait Confirm: Send + Sync {
    /// Returns `true` if `message` may be deleted.
    fn confirm_delete(&self, message: &Message) -> impl Future<Output = bool> + Send;
}

/// Writes to the message list of one chat.
pub struct MessageLog<B> {
    backend: Arc<B>,
    chat: ChatId,
}

impl<B> Clone for MessageLog<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            chat: self.chat.clone(),
        }
    }
}

impl<B: Backend> MessageLog<B> {
    /// Creates a log for `chat`, acting as the backend's user.
    #[must_use]
    pub const fn new(backend: Arc<B>, chat: ChatId) -> Self {
        Self { backend, chat }
    }

    /// The chat this log writes to.
    #[must_use]
    pub const fn chat(&self) -> &ChatId {
        &self.chat
    }

    /// Appends a new message and returns its key.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Validation`] for empty (after trimming) or
    /// oversized content, or [`MessageError::Backend`] if the store refuses
    /// the write.
    pub async fn append(&self, content: &str) -> Result<String, MessageError> {
        let record = Message::compose(self.backend.user(), content, Timestamp::now())?;
        let key = self
            .backend
            .push(&Path::messages(&self.chat)?, record.to_value())
            .await?;
        tracing::debug!(chat = %self.chat, key = %key, "message appended");
        Ok(key)
    }

    /// Reads one message.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::NotFound`] if the key holds no valid record.
    pub async fn fetch(&self, key: &str) -> Result<Message, MessageError> {
        let value = self
            .backend
            .get(&Path::message(&self.chat, key)?)
            .await?;
        Message::from_value(&value).map_err(|_| MessageError::NotFound(key.to_string()))
    }

    /// Checks that the local user may edit the message under `key` and
    /// returns it.
    ///
    /// # Errors
    ///
    /// - [`MessageError::NotAuthor`] if someone else wrote it.
    /// - [`MessageError::AlreadyEdited`] if it was edited before.
    pub async fn editable(&self, key: &str) -> Result<Message, MessageError> {
        let current = self.fetch(key).await?;
        if current.author != self.backend.user() {
            return Err(MessageError::NotAuthor { action: "edit" });
        }
        if current.edited {
            return Err(MessageError::AlreadyEdited);
        }
        Ok(current)
    }

    /// Replaces the content of the message under `key` and marks it edited.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Validation`] for bad content, the errors of
    /// [`editable`](Self::editable), or [`MessageError::Backend`] if the store
    /// refuses the update (for instance because a concurrent edit won).
    pub async fn edit(&self, key: &str, content: &str) -> Result<(), MessageError> {
        message::validate_content(content)?;
        self.editable(key).await?;
        self.backend
            .update(
                &Path::message(&self.chat, key)?,
                Message::edit_fields(content),
            )
            .await?;
        tracing::debug!(chat = %self.chat, key, "message edited");
        Ok(())
    }

    /// Deletes the message under `key` after the user confirms.
    ///
    /// Returns `false` if the user declined.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::NotAuthor`] if someone else wrote it, or
    /// [`MessageError::Backend`] if the store refuses the removal.
    pub async fn delete<C: Confirm>(&self, key: &str, confirm: &C) -> Result<bool, MessageError> {
        let current = self.fetch(key).await?;
        if current.author != self.backend.user() {
            return Err(MessageError::NotAuthor { action: "delete" });
        }
        if !confirm.confirm_delete(&current).await {
            tracing::debug!(chat = %self.chat, key, "delete declined");
            return Ok(false);
        }
        self.backend
            .remove(&Path::message(&self.chat, key)?)
            .await?;
        tracing::debug!(chat = %self.chat, key, "message deleted");
        Ok(true)
    }

    /// Starts a live view of the chat's messages.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Backend`] if the subscription is refused.
    pub async fn subscribe(&self) -> Result<MessageFeed<B>, MessageError> {
        let subscription = self.backend.subscribe(&Path::messages(&self.chat)?).await?;
        Ok(MessageFeed {
            backend: Arc::clone(&self.backend),
            chat: self.chat.clone(),
            subscription,
        })
    }
}

/// Live, key-ordered view of a chat's messages.
pub struct MessageFeed<B> {
    backend: Arc<B>,
    chat: ChatId,
    subscription: Subscription,
}

impl<B: Backend> MessageFeed<B> {
    /// Waits for the next version of the message list.
    ///
    /// Malformed records are logged and left out. Before returning, every
    /// listed message written by the other participant that is still unread
    /// is marked read; those writes are fire-and-forget.
    pub async fn next(&mut self) -> Option<Vec<MessageEntry>> {
        let snapshot = self.subscription.next().await?;
        let entries: Vec<MessageEntry> = MessageEntry::list(&snapshot)
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err((key, e)) => {
                    tracing::warn!(chat = %self.chat, key = %key, error = %e, "skipping malformed message");
                    None
                }
            })
            .collect();
        self.mark_read(&entries).await;
        Some(entries)
    }

    async fn mark_read(&self, entries: &[MessageEntry]) {
        let user = self.backend.user();
        for entry in entries
            .iter()
            .filter(|e| e.message.author != user && !e.message.read)
        {
            let result = match Path::message(&self.chat, &entry.key) {
                Ok(path) => {
                    self.backend
                        .update(&path, Message::read_fields(Timestamp::now()))
                        .await
                }
                Err(e) => Err(BackendError::Rejected(e.to_string())),
            };
            if let Err(e) = result {
                tracing::warn!(chat = %self.chat, key = %entry.key, error = %e, "failed to mark message read");
            }
        }
    }
}
