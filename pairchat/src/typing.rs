//! Typing indicator protocol.
//!
//! [`TypingIndicator`] is the per-(chat, user) state machine. It is a plain
//! value: callers hand it the current draft and the current time and it
//! says what to publish. [`TypingPublisher`] owns one indicator on a tokio
//! task, feeds it keystrokes and its idle deadline, and writes the results
//! to `typing/{chatId}/{user}`. [`TypingWatch`] follows the other
//! participant's key.
//!
//! ```text
//!            non-empty draft (re-arms deadline)
//!        ┌───────────────────────┐
//!        │                       ▼
//!      Idle ◄── empty draft ── Typing
//!        ▲                       │
//!        └──── deadline passed ──┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use pairchat_proto::chat_id::ChatId;
use pairchat_proto::path::Path;
use pairchat_proto::typing::TypingState;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::backend::{Backend, BackendError, Subscription};

/// Idle time after the last keystroke before typing ends.
pub const DEFAULT_TYPING_TIMEOUT: Duration = Duration::from_secs(2);

/// Typing state machine for one user in one chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingIndicator {
    state: TypingState,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl TypingIndicator {
    /// Creates an idle indicator with the given idle timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self {
            state: TypingState::Idle,
            deadline: None,
            timeout,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> TypingState {
        self.state
    }

    /// When the indicator will fall back to idle, if it is typing.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Handles a change of the draft at time `now`.
    ///
    /// A non-empty (after trimming) draft re-arms the deadline and returns
    /// [`TypingState::Typing`] on every keystroke, so a lost write is
    /// repaired by the next one. An empty draft returns to idle at once and
    /// reports it only if the indicator was typing.
    pub fn on_draft(&mut self, draft: &str, now: Instant) -> Option<TypingState> {
        if draft.trim().is_empty() {
            self.deadline = None;
            self.transition(TypingState::Idle)
        } else {
            self.deadline = Some(now + self.timeout);
            self.state = TypingState::Typing;
            Some(TypingState::Typing)
        }
    }

    /// Checks the deadline at time `now`. Returns [`TypingState::Idle`] when
    /// it has passed while typing.
    pub fn on_tick(&mut self, now: Instant) -> Option<TypingState> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.transition(TypingState::Idle)
            }
            _ => None,
        }
    }

    /// Forces the indicator idle and returns the state to publish.
    pub fn close(&mut self) -> TypingState {
        self.deadline = None;
        self.state = TypingState::Idle;
        self.state
    }

    fn transition(&mut self, next: TypingState) -> Option<TypingState> {
        if self.state == next {
            None
        } else {
            self.state = next;
            Some(next)
        }
    }
}

enum Command {
    Draft(String),
    Close(oneshot::Sender<()>),
}

/// Publishes the local user's typing state for one chat.
///
/// Runs a [`TypingIndicator`] on a background task. Store write failures
/// are logged and dropped.
pub struct TypingPublisher {
    commands: mpsc::UnboundedSender<Command>,
    task: tokio::task::JoinHandle<()>,
}

impl TypingPublisher {
    /// Starts publishing to `typing/{chat}/{user}` for the backend's user.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Rejected`] if the user name cannot form a
    /// typing key.
    pub fn spawn<B: Backend + 'static>(
        backend: Arc<B>,
        chat: &ChatId,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let path = typing_path(chat, backend.user())?;
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(backend, path, TypingIndicator::new(timeout), rx));
        Ok(Self { commands, task })
    }

    /// Reports the current draft text.
    pub fn draft_changed(&self, draft: &str) {
        if self.commands.send(Command::Draft(draft.to_string())).is_err() {
            tracing::debug!("typing publisher already stopped");
        }
    }

    /// Stops the idle timer and publishes `false`. Returns once written.
    pub async fn close(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Close(ack)).is_ok() && done.await.is_err() {
            tracing::debug!("typing publisher stopped before acknowledging close");
        }
        if let Err(e) = self.task.await {
            tracing::debug!(error = %e, "typing publisher task ended abnormally");
        }
    }
}

async fn run<B: Backend>(
    backend: Arc<B>,
    path: Path,
    mut indicator: TypingIndicator,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    loop {
        let deadline = indicator.deadline();
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Draft(draft)) => {
                    if let Some(state) = indicator.on_draft(&draft, Instant::now()) {
                        publish(&*backend, &path, state).await;
                    }
                }
                Some(Command::Close(ack)) => {
                    publish(&*backend, &path, indicator.close()).await;
                    if ack.send(()).is_err() {
                        tracing::debug!("typing close requester went away");
                    }
                    return;
                }
                None => {
                    if indicator.state().is_typing() {
                        publish(&*backend, &path, indicator.close()).await;
                    }
                    return;
                }
            },
            () = sleep_until(deadline) => {
                if let Some(state) = indicator.on_tick(Instant::now()) {
                    publish(&*backend, &path, state).await;
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn publish<B: Backend>(backend: &B, path: &Path, state: TypingState) {
    tracing::debug!(path = %path, typing = state.is_typing(), "publishing typing state");
    if let Err(e) = backend.set(path, state.to_value()).await {
        tracing::warn!(path = %path, error = %e, "failed to publish typing state");
    }
}

/// Live typing state of another user in a chat.
pub struct TypingWatch {
    subscription: Subscription,
}

impl TypingWatch {
    /// Subscribes to `typing/{chat}/{user}`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError`] if the subscription cannot be started.
    pub async fn start<B: Backend>(
        backend: &B,
        chat: &ChatId,
        user: &str,
    ) -> Result<Self, BackendError> {
        let subscription = backend.subscribe(&typing_path(chat, user)?).await?;
        Ok(Self { subscription })
    }

    /// Waits for the next reported state.
    pub async fn next(&mut self) -> Option<TypingState> {
        self.subscription
            .next()
            .await
            .map(|value| TypingState::from_value(&value))
    }
}

fn typing_path(chat: &ChatId, user: &str) -> Result<Path, BackendError> {
    Path::typing(chat, user).map_err(|e| BackendError::Rejected(e.to_string()))
}
