//! Two-party chat pairing identifiers.
//!
//! A [`ChatId`] is two user identifiers joined by [`SEPARATOR`], e.g.
//! `alice_bob`. The pairing is unordered in meaning but the string is kept
//! exactly as stored so it can be used verbatim as a keyspace segment.

use serde::{Deserialize, Serialize};

/// Separator between the two participants of a pairing.
pub const SEPARATOR: char = '_';

/// Errors raised when parsing or querying a chat pairing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatIdError {
    /// The string does not split into exactly two non-empty participants.
    #[error("malformed chat id {0:?}: expected two participants joined by '_'")]
    Malformed(String),

    /// Both halves name the same user.
    #[error("chat id {0:?} pairs a user with themselves")]
    SameParticipant(String),

    /// The user asked about is not part of this pairing.
    #[error("{user} is not a participant of chat {chat_id}")]
    NotAParticipant {
        /// The pairing that was queried.
        chat_id: String,
        /// The user that is not in it.
        user: String,
    },
}

/// Identifier of a two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatId(String);

impl ChatId {
    /// Parses a pairing string such as `alice_bob`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatIdError::Malformed`] unless the string holds exactly one
    /// separator with non-empty text on both sides, and
    /// [`ChatIdError::SameParticipant`] if both sides are equal.
    pub fn parse(raw: &str) -> Result<Self, ChatIdError> {
        let mut parts = raw.split(SEPARATOR);
        let (Some(first), Some(second), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(ChatIdError::Malformed(raw.to_string()));
        };
        if first.is_empty() || second.is_empty() {
            return Err(ChatIdError::Malformed(raw.to_string()));
        }
        if first == second {
            return Err(ChatIdError::SameParticipant(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }

    /// Builds the pairing of two users, in the given order.
    ///
    /// # Errors
    ///
    /// Same as [`ChatId::parse`] on the joined string.
    pub fn pair(first: &str, second: &str) -> Result<Self, ChatIdError> {
        Self::parse(&format!("{first}{SEPARATOR}{second}"))
    }

    /// Returns both participants in stored order.
    #[must_use]
    pub fn participants(&self) -> (&str, &str) {
        // Validated at construction.
        self.0.split_once(SEPARATOR).unwrap_or((&self.0, ""))
    }

    /// Returns `true` if `user` is one of the two participants.
    #[must_use]
    pub fn contains(&self, user: &str) -> bool {
        let (a, b) = self.participants();
        a == user || b == user
    }

    /// Returns the participant that is not `user`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatIdError::NotAParticipant`] if `user` is not in the pairing.
    pub fn recipient_for(&self, user: &str) -> Result<&str, ChatIdError> {
        match self.participants() {
            (a, b) if a == user => Ok(b),
            (a, b) if b == user => Ok(a),
            _ => Err(ChatIdError::NotAParticipant {
                chat_id: self.0.clone(),
                user: user.to_string(),
            }),
        }
    }

    /// Returns the raw pairing string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ChatId {
    type Err = ChatIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
