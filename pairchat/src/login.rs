//! Login: password to user, chat number to pairing.
//!
//! The password is checked by the store while the connection registers, so
//! the password table never leaves the store. The chat number is then looked
//! up under `chatPairs/{number}` and the resulting pairing must include the
//! authenticated user.

use pairchat_proto::chat_id::{ChatId, ChatIdError};
use pairchat_proto::path::Path;

use crate::backend::{Backend, BackendError, Connector};

/// Errors that end a login attempt.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// No user has this password.
    #[error("wrong password")]
    WrongPassword,

    /// No chat is registered under this number.
    #[error("unknown chat {0:?}")]
    UnknownChat(String),

    /// The chat exists but its pairing string is malformed.
    #[error("chat {code:?} has an invalid pairing: {source}")]
    InvalidPairing {
        /// The chat number that was looked up.
        code: String,
        /// Why the pairing is invalid.
        source: ChatIdError,
    },

    /// The user is not one of the chat's two participants.
    #[error("{user} is not a participant of chat {chat}")]
    NotAParticipant {
        /// The authenticated user.
        user: String,
        /// The chat that was looked up.
        chat: ChatId,
    },

    /// The store could not be reached or failed.
    #[error("store error: {0}")]
    Backend(BackendError),
}

impl From<BackendError> for LoginError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::WrongPassword => Self::WrongPassword,
            other => Self::Backend(other),
        }
    }
}

/// A successful login.
pub struct LoggedIn<B> {
    /// Authenticated store connection.
    pub backend: B,
    /// The chat to open.
    pub chat: ChatId,
}

/// Authenticates with `password` and resolves `chat_number` to a pairing
/// that includes the authenticated user.
///
/// # Errors
///
/// - [`LoginError::WrongPassword`] if the store rejects the password.
/// - [`LoginError::UnknownChat`] if no chat has that number.
/// - [`LoginError::InvalidPairing`] if the stored pairing is malformed.
/// - [`LoginError::NotAParticipant`] if the user is not in the pairing.
/// - [`LoginError::Backend`] for connection failures.
pub async fn login<C: Connector>(
    connector: &C,
    password: &str,
    chat_number: &str,
) -> Result<LoggedIn<C::Backend>, LoginError> {
    let code = chat_number.trim();
    let backend = connector.connect(password).await?;

    let path = Path::chat_pair(code).map_err(|_| LoginError::UnknownChat(code.to_string()))?;
    let value = backend.get(&path).await?;
    let Some(raw) = value.as_text() else {
        tracing::info!(code, "chat number not found");
        return Err(LoginError::UnknownChat(code.to_string()));
    };
    let chat = ChatId::parse(raw).map_err(|source| LoginError::InvalidPairing {
        code: code.to_string(),
        source,
    })?;

    if !chat.contains(backend.user()) {
        tracing::warn!(user = backend.user(), chat = %chat, "login to a chat the user is not in");
        return Err(LoginError::NotAParticipant {
            user: backend.user().to_string(),
            chat,
        });
    }

    tracing::info!(user = backend.user(), chat = %chat, "logged in");
    Ok(LoggedIn { backend, chat })
}
