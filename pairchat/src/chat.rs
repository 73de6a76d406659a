//! Chat session: the three sync protocols wired together for one pairing.
//!
//! [`ChatSession::open`] derives the recipient from the chat id, announces
//! the local user as online, starts the typing publisher, and spawns one
//! task per subscription (messages, recipient presence, recipient typing).
//! Those tasks report through a [`ChatEvent`] channel that the UI drains.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pairchat_proto::chat_id::{ChatId, ChatIdError};
use pairchat_proto::message::{self, MessageEntry};
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::typing::TypingState;
use tokio::sync::mpsc;

use crate::backend::{Backend, BackendError};
use crate::messages::{Confirm, MessageError, MessageLog};
use crate::presence::{self, PresenceWatch};
use crate::typing::{DEFAULT_TYPING_TIMEOUT, TypingPublisher, TypingWatch};

/// Default capacity of the [`ChatEvent`] channel.
const DEFAULT_EVENT_BUFFER: usize = 64;

/// Errors raised while opening a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The local user is not part of the pairing, so there is no recipient.
    #[error(transparent)]
    ChatId(#[from] ChatIdError),

    /// A subscription could not be started.
    #[error("store error: {0}")]
    Backend(#[from] BackendError),

    /// The message list could not be opened.
    #[error(transparent)]
    Message(#[from] MessageError),
}

/// Tunables for a [`ChatSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Idle time after the last keystroke before typing ends.
    pub typing_timeout: Duration,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            typing_timeout: DEFAULT_TYPING_TIMEOUT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Events emitted by a [`ChatSession`] for UI notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// The message list changed; carries the whole list in store order.
    MessagesChanged(Vec<MessageEntry>),
    /// The recipient came online or went offline.
    RecipientPresence(PresenceStatus),
    /// The recipient started or stopped typing.
    RecipientTyping(TypingState),
}

/// What [`ChatSession::submit`] did with the draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// A new message was appended under this key.
    Appended(String),
    /// The message under this key was edited.
    Edited(String),
}

/// One open chat between the local user and the recipient.
pub struct ChatSession<B: Backend + 'static> {
    backend: Arc<B>,
    recipient: String,
    log: MessageLog<B>,
    /// Taken on close.
    typing: Option<TypingPublisher>,
    /// Key of the message being edited, if any.
    editing: Option<String>,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl<B: Backend + 'static> ChatSession<B> {
    /// Opens the chat `chat` for the backend's user.
    ///
    /// Returns the session and a receiver for [`ChatEvent`]s.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ChatId`] if the user is not a participant of `chat`.
    /// - [`SessionError::Backend`] / [`SessionError::Message`] if a
    ///   subscription cannot be started.
    pub async fn open(
        backend: Arc<B>,
        chat: ChatId,
        config: SessionConfig,
    ) -> Result<(Self, mpsc::Receiver<ChatEvent>), SessionError> {
        let recipient = chat.recipient_for(backend.user())?.to_string();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

        presence::go_online(&*backend).await;

        let log = MessageLog::new(Arc::clone(&backend), chat.clone());
        let mut feed = log.subscribe().await?;
        let mut presence_watch = PresenceWatch::start(&*backend, &recipient).await?;
        let mut typing_watch = TypingWatch::start(&*backend, &chat, &recipient).await?;
        let typing = TypingPublisher::spawn(Arc::clone(&backend), &chat, config.typing_timeout)?;

        let messages_tx = event_tx.clone();
        let messages_task = tokio::spawn(async move {
            while let Some(entries) = feed.next().await {
                if messages_tx
                    .send(ChatEvent::MessagesChanged(entries))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let presence_tx = event_tx.clone();
        let presence_task = tokio::spawn(async move {
            while let Some(status) = presence_watch.next().await {
                if presence_tx
                    .send(ChatEvent::RecipientPresence(status))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let typing_task = tokio::spawn(async move {
            while let Some(state) = typing_watch.next().await {
                if event_tx
                    .send(ChatEvent::RecipientTyping(state))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        tracing::info!(chat = %chat, user = backend.user(), recipient = %recipient, "chat opened");

        Ok((
            Self {
                backend,
                recipient,
                log,
                typing: Some(typing),
                editing: None,
                tasks: vec![messages_task, presence_task, typing_task],
            },
            event_rx,
        ))
    }

    /// The other participant.
    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// The local user.
    #[must_use]
    pub fn user(&self) -> &str {
        self.backend.user()
    }

    /// The open chat.
    #[must_use]
    pub const fn chat(&self) -> &ChatId {
        self.log.chat()
    }

    /// Key of the message being edited, if any.
    #[must_use]
    pub fn editing(&self) -> Option<&str> {
        self.editing.as_deref()
    }

    /// Reports the current draft text to the typing indicator.
    pub fn draft_changed(&self, draft: &str) {
        if let Some(typing) = &self.typing {
            typing.draft_changed(draft);
        }
    }

    /// Sends the draft: appends it, or while editing, replaces the edited
    /// message's content. The typing indicator is cleared either way.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError`] if the append or edit is rejected. An
    /// [`MessageError::AlreadyEdited`] rejection also ends edit mode.
    pub async fn submit(&mut self, text: &str) -> Result<Submitted, MessageError> {
        self.draft_changed("");
        match self.editing.clone() {
            Some(key) => match self.log.edit(&key, text).await {
                Ok(()) => {
                    self.editing = None;
                    Ok(Submitted::Edited(key))
                }
                Err(e) => {
                    if matches!(e, MessageError::AlreadyEdited) {
                        self.editing = None;
                    }
                    Err(e)
                }
            },
            None => self.log.append(text).await.map(Submitted::Appended),
        }
    }

    /// Appends `text` as a new message without waiting for the store.
    ///
    /// The content is checked up front and the typing indicator is cleared;
    /// the returned future performs the write and can be spawned so the
    /// caller stays responsive. It always appends, even in edit mode.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Validation`] for empty (after trimming) or
    /// oversized content. Store failures surface from the future.
    pub fn send_detached(
        &self,
        text: &str,
    ) -> Result<impl Future<Output = Result<String, MessageError>> + Send + 'static, MessageError>
    {
        message::validate_content(text)?;
        self.draft_changed("");
        let log = self.log.clone();
        let text = text.to_string();
        Ok(async move { log.append(&text).await })
    }

    /// Enters edit mode for the message under `key` and returns its current
    /// content for prefilling the draft.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::NotAuthor`] or [`MessageError::AlreadyEdited`]
    /// when the message cannot be edited; the latter also ends edit mode.
    pub async fn start_edit(&mut self, key: &str) -> Result<String, MessageError> {
        match self.log.editable(key).await {
            Ok(message) => {
                self.editing = Some(key.to_string());
                Ok(message.content)
            }
            Err(e) => {
                if matches!(e, MessageError::AlreadyEdited) {
                    self.editing = None;
                }
                Err(e)
            }
        }
    }

    /// Leaves edit mode without changing anything.
    pub fn cancel_edit(&mut self) {
        self.editing = None;
    }

    /// Deletes the message under `key` once `confirm` agrees.
    ///
    /// Returns `false` if the user declined.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::NotAuthor`] if the local user did not write it.
    pub async fn delete<C: Confirm>(&mut self, key: &str, confirm: &C) -> Result<bool, MessageError> {
        let deleted = self.log.delete(key, confirm).await?;
        if deleted && self.editing.as_deref() == Some(key) {
            self.editing = None;
        }
        Ok(deleted)
    }

    /// Leaves the chat: stops the typing indicator (publishing `false`),
    /// publishes the local user as offline, and ends all subscriptions.
    pub async fn close(mut self) {
        if let Some(typing) = self.typing.take() {
            typing.close().await;
        }
        presence::go_offline(&*self.backend).await;
        for task in &self.tasks {
            task.abort();
        }
        tracing::info!(chat = %self.log.chat(), user = self.backend.user(), "chat closed");
    }
}

impl<B: Backend + 'static> Drop for ChatSession<B> {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
