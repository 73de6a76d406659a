//! Presence status stored under `status/{user}`.

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Binary presence of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceStatus {
    /// User has an open chat session.
    Online,
    /// User left, disconnected, or was never seen.
    Offline,
}

impl PresenceStatus {
    /// Reads a `status/{user}` value. Anything but `true` is offline.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        if value.as_bool() == Some(true) {
            Self::Online
        } else {
            Self::Offline
        }
    }

    /// Returns the value to publish for this status.
    #[must_use]
    pub const fn to_value(self) -> Value {
        Value::Bool(matches!(self, Self::Online))
    }

    /// Returns `true` for [`PresenceStatus::Online`].
    #[must_use]
    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Online => write!(f, "online"),
            Self::Offline => write!(f, "offline"),
        }
    }
}
