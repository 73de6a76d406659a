//! Message records stored under `messages/{chatId}/{key}`.
//!
//! Records are plain store maps so that partial updates (an edit, a read
//! receipt) touch only their own fields. Field names follow the keyspace
//! convention below.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Maximum content size in bytes.
pub const MAX_CONTENT_LEN: usize = 4096;

/// Author field.
pub const ROLE: &str = "role";
/// Text content field.
pub const CONTENT: &str = "content";
/// Creation time field.
pub const TIMESTAMP: &str = "timestamp";
/// Send time field.
pub const SENT_TIMESTAMP: &str = "sentTimestamp";
/// Edited flag field.
pub const EDITED: &str = "edited";
/// Read flag field.
pub const READ: &str = "read";
/// Read time field.
pub const READ_TIMESTAMP: &str = "readTimestamp";

/// Millisecond-precision UTC wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The current time.
    #[must_use]
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match chrono::DateTime::from_timestamp_millis(self.0) {
            Some(utc) => write!(
                f,
                "{}",
                utc.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            ),
            None => write!(f, "{}ms", self.0),
        }
    }
}

/// Reasons message content is refused before it is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content is empty after trimming whitespace.
    #[error("message is empty")]
    Empty,

    /// Content exceeds [`MAX_CONTENT_LEN`].
    #[error("message too large: {size} bytes (max {max} bytes)")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

/// A stored record could not be read as a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The record is not a map.
    #[error("record is not a map")]
    NotAMap,

    /// A required field is absent.
    #[error("missing field {0:?}")]
    MissingField(&'static str),

    /// A field holds the wrong kind of value.
    #[error("field {0:?} has the wrong type")]
    WrongType(&'static str),
}

/// Checks that `content` is worth sending.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank text and
/// [`ValidationError::TooLarge`] above [`MAX_CONTENT_LEN`] bytes.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Empty);
    }
    if content.len() > MAX_CONTENT_LEN {
        return Err(ValidationError::TooLarge {
            size: content.len(),
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(())
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// User that wrote the message.
    pub author: String,
    /// Text as typed.
    pub content: String,
    /// When the message was created.
    pub timestamp: Timestamp,
    /// When the message was sent.
    pub sent_timestamp: Timestamp,
    /// Set once the author has edited the message. Never reset.
    pub edited: bool,
    /// Set once the other participant has seen the message. Never reset.
    pub read: bool,
    /// When the message was first seen by the other participant.
    pub read_timestamp: Option<Timestamp>,
}

impl Message {
    /// Builds a fresh, unread, unedited message.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if `content` fails [`validate_content`].
    pub fn compose(
        author: impl Into<String>,
        content: impl Into<String>,
        now: Timestamp,
    ) -> Result<Self, ValidationError> {
        let content = content.into();
        validate_content(&content)?;
        Ok(Self {
            author: author.into(),
            content,
            timestamp: now,
            sent_timestamp: now,
            edited: false,
            read: false,
            read_timestamp: None,
        })
    }

    /// Returns the store representation of this record.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert(ROLE.to_string(), Value::from(self.author.as_str()));
        map.insert(CONTENT.to_string(), Value::from(self.content.as_str()));
        map.insert(TIMESTAMP.to_string(), Value::Int(self.timestamp.0));
        map.insert(SENT_TIMESTAMP.to_string(), Value::Int(self.sent_timestamp.0));
        map.insert(EDITED.to_string(), Value::Bool(self.edited));
        map.insert(READ.to_string(), Value::Bool(self.read));
        if let Some(at) = self.read_timestamp {
            map.insert(READ_TIMESTAMP.to_string(), Value::Int(at.0));
        }
        Value::Map(map)
    }

    /// Reads a record back from the store.
    ///
    /// Missing `edited`/`read` flags read as `false`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] if the record is not a map, or if the author,
    /// content or timestamps are absent or mistyped.
    pub fn from_value(value: &Value) -> Result<Self, RecordError> {
        if value.as_map().is_none() {
            return Err(RecordError::NotAMap);
        }
        let author = text_field(value, ROLE)?;
        let content = text_field(value, CONTENT)?;
        let timestamp = int_field(value, TIMESTAMP)?;
        let sent_timestamp = match value.field(SENT_TIMESTAMP) {
            Value::Null => timestamp,
            Value::Int(ms) => *ms,
            _ => return Err(RecordError::WrongType(SENT_TIMESTAMP)),
        };
        let read_timestamp = match value.field(READ_TIMESTAMP) {
            Value::Null => None,
            Value::Int(ms) => Some(Timestamp(*ms)),
            _ => return Err(RecordError::WrongType(READ_TIMESTAMP)),
        };
        Ok(Self {
            author,
            content,
            timestamp: Timestamp(timestamp),
            sent_timestamp: Timestamp(sent_timestamp),
            edited: flag_field(value, EDITED)?,
            read: flag_field(value, READ)?,
            read_timestamp,
        })
    }

    /// Field update that replaces the content and marks the record edited.
    #[must_use]
    pub fn edit_fields(content: &str) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (CONTENT.to_string(), Value::from(content)),
            (EDITED.to_string(), Value::Bool(true)),
        ])
    }

    /// Field update that records a read receipt.
    #[must_use]
    pub fn read_fields(at: Timestamp) -> BTreeMap<String, Value> {
        BTreeMap::from([
            (READ.to_string(), Value::Bool(true)),
            (READ_TIMESTAMP.to_string(), Value::Int(at.0)),
        ])
    }
}

/// A message together with its store-assigned key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    /// Push key; lexical order is insertion order.
    pub key: String,
    /// The record.
    pub message: Message,
}

impl MessageEntry {
    /// Reads every record of a `messages/{chatId}` snapshot in key order.
    ///
    /// Malformed records are yielded as errors alongside their key so the
    /// caller can decide whether to skip them.
    pub fn list(snapshot: &Value) -> impl Iterator<Item = Result<Self, (String, RecordError)>> + '_ {
        snapshot
            .as_map()
            .into_iter()
            .flatten()
            .map(|(key, record)| match Message::from_value(record) {
                Ok(message) => Ok(Self {
                    key: key.clone(),
                    message,
                }),
                Err(e) => Err((key.clone(), e)),
            })
    }
}

fn text_field(value: &Value, name: &'static str) -> Result<String, RecordError> {
    match value.field(name) {
        Value::Text(s) => Ok(s.clone()),
        Value::Null => Err(RecordError::MissingField(name)),
        _ => Err(RecordError::WrongType(name)),
    }
}

fn int_field(value: &Value, name: &'static str) -> Result<i64, RecordError> {
    match value.field(name) {
        Value::Int(i) => Ok(*i),
        Value::Null => Err(RecordError::MissingField(name)),
        _ => Err(RecordError::WrongType(name)),
    }
}

fn flag_field(value: &Value, name: &'static str) -> Result<bool, RecordError> {
    match value.field(name) {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        _ => Err(RecordError::WrongType(name)),
    }
}
