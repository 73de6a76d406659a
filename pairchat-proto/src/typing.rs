//! Typing state stored under `typing/{chatId}/{user}`.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Whether a user is composing a message in a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypingState {
    /// No draft, or the draft has been idle past the timeout.
    #[default]
    Idle,
    /// The user has a non-empty draft and typed recently.
    Typing,
}

impl TypingState {
    /// Reads a `typing/{chatId}/{user}` value. Anything but `true` is idle.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        if value.as_bool() == Some(true) {
            Self::Typing
        } else {
            Self::Idle
        }
    }

    /// Returns the value to publish for this state.
    #[must_use]
    pub const fn to_value(self) -> Value {
        Value::Bool(self.is_typing())
    }

    /// Returns `true` for [`TypingState::Typing`].
    #[must_use]
    pub const fn is_typing(self) -> bool {
        matches!(self, Self::Typing)
    }
}
