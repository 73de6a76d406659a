//! Keyspace paths and the fixed layout of the chat keyspace.
//!
//! ```text
//! passwords/{user}                  -> password text (directory)
//! chatPairs/{code}                  -> chat id text (directory)
//! messages/{chatId}/{messageKey}    -> message record
//! status/{user}                     -> bool presence
//! typing/{chatId}/{user}            -> bool typing flag
//! ```

use serde::{Deserialize, Serialize};

use crate::chat_id::ChatId;

/// Root segment of the password directory.
pub const PASSWORDS: &str = "passwords";
/// Root segment of the chat-code directory.
pub const CHAT_PAIRS: &str = "chatPairs";
/// Root segment of message logs.
pub const MESSAGES: &str = "messages";
/// Root segment of presence records.
pub const STATUS: &str = "status";
/// Root segment of typing records.
pub const TYPING: &str = "typing";

/// Characters that may not appear in a path segment.
const FORBIDDEN: &[char] = &['/', '.', '#', '$', '[', ']'];

/// Errors raised when building a path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// A segment was empty (e.g. `a//b`).
    #[error("empty path segment in {0:?}")]
    EmptySegment(String),

    /// A segment contained a reserved character.
    #[error("invalid character in path segment {0:?}")]
    InvalidSegment(String),
}

/// A `/`-separated location in the store tree. The empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Path(Vec<String>);

impl Path {
    /// The root of the keyspace.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Parses `a/b/c`. Leading and trailing slashes are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if any segment is empty or holds a reserved
    /// character.
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let trimmed = raw.trim_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        let mut path = Self::root();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(raw.to_string()));
            }
            path = path.child(segment)?;
        }
        Ok(path)
    }

    /// Returns this path extended by one segment.
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if `segment` is empty or holds a reserved
    /// character.
    pub fn child(&self, segment: &str) -> Result<Self, PathError> {
        validate_segment(segment)?;
        let mut segments = self.0.clone();
        segments.push(segment.to_string());
        Ok(Self(segments))
    }

    /// Returns the parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, init) = self.0.split_last()?;
        Some(Self(init.to_vec()))
    }

    /// Returns the final segment, or `None` for the root.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Returns the individual segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` for the root path.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `true` if `prefix` is this path or one of its ancestors.
    #[must_use]
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Returns `true` if a write at one path can change the value at the other.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// `passwords`
    #[must_use]
    pub fn passwords() -> Self {
        Self(vec![PASSWORDS.to_string()])
    }

    /// `chatPairs/{code}`
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if `code` is not a valid segment.
    pub fn chat_pair(code: &str) -> Result<Self, PathError> {
        Self(vec![CHAT_PAIRS.to_string()]).child(code)
    }

    /// `messages/{chatId}`
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the chat id is not a valid segment.
    pub fn messages(chat: &ChatId) -> Result<Self, PathError> {
        Self(vec![MESSAGES.to_string()]).child(chat.as_str())
    }

    /// `messages/{chatId}/{key}`
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the chat id or key is not a valid segment.
    pub fn message(chat: &ChatId, key: &str) -> Result<Self, PathError> {
        Self::messages(chat)?.child(key)
    }

    /// `status/{user}`
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if `user` is not a valid segment.
    pub fn status(user: &str) -> Result<Self, PathError> {
        Self(vec![STATUS.to_string()]).child(user)
    }

    /// `typing/{chatId}/{user}`
    ///
    /// # Errors
    ///
    /// Returns [`PathError`] if the chat id or user is not a valid segment.
    pub fn typing(chat: &ChatId, user: &str) -> Result<Self, PathError> {
        Self(vec![TYPING.to_string()])
            .child(chat.as_str())?
            .child(user)
    }

    /// Classifies this path against the chat keyspace layout.
    #[must_use]
    pub fn location(&self) -> Location<'_> {
        let segs: Vec<&str> = self.0.iter().map(String::as_str).collect();
        match *segs.as_slice() {
            [] => Location::Root,
            [PASSWORDS] => Location::Passwords(None),
            [PASSWORDS, user] => Location::Passwords(Some(user)),
            [CHAT_PAIRS] => Location::ChatPairs(None),
            [CHAT_PAIRS, code] => Location::ChatPairs(Some(code)),
            [MESSAGES] => Location::Messages {
                chat: None,
                key: None,
                field: None,
            },
            [MESSAGES, chat] => Location::Messages {
                chat: Some(chat),
                key: None,
                field: None,
            },
            [MESSAGES, chat, key] => Location::Messages {
                chat: Some(chat),
                key: Some(key),
                field: None,
            },
            [MESSAGES, chat, key, field] => Location::Messages {
                chat: Some(chat),
                key: Some(key),
                field: Some(field),
            },
            [STATUS] => Location::Status(None),
            [STATUS, user] => Location::Status(Some(user)),
            [TYPING] => Location::Typing {
                chat: None,
                user: None,
            },
            [TYPING, chat] => Location::Typing {
                chat: Some(chat),
                user: None,
            },
            [TYPING, chat, user] => Location::Typing {
                chat: Some(chat),
                user: Some(user),
            },
            _ => Location::Unknown,
        }
    }
}

/// Where a [`Path`] falls in the chat keyspace.
///
/// `None` components mean the path stops above that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location<'a> {
    /// The whole keyspace.
    Root,
    /// `passwords[/user]`
    Passwords(Option<&'a str>),
    /// `chatPairs[/code]`
    ChatPairs(Option<&'a str>),
    /// `messages[/chat[/key[/field]]]`
    Messages {
        /// Chat id segment.
        chat: Option<&'a str>,
        /// Message key segment.
        key: Option<&'a str>,
        /// Single record field.
        field: Option<&'a str>,
    },
    /// `status[/user]`
    Status(Option<&'a str>),
    /// `typing[/chat[/user]]`
    Typing {
        /// Chat id segment.
        chat: Option<&'a str>,
        /// User segment.
        user: Option<&'a str>,
    },
    /// Outside the known layout.
    Unknown,
}

fn validate_segment(segment: &str) -> Result<(), PathError> {
    if segment.is_empty() {
        return Err(PathError::EmptySegment(segment.to_string()));
    }
    if segment.contains(FORBIDDEN) {
        return Err(PathError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}
