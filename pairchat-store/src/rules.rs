//! Server-side write and read rules for the chat keyspace.
//!
//! Every client operation is checked here against the caller's registered
//! identity before it touches the tree. The checks run while the database
//! holds its write lock, so "read the current record, decide, write" is a
//! single atomic step.

use std::collections::BTreeSet;

use pairchat_proto::chat_id::ChatId;
use pairchat_proto::message::{self, Message};
use pairchat_proto::path::{Location, Path};
use pairchat_proto::value::Value;

/// Kind of mutation being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Whole-value replacement.
    Set,
    /// Field merge into an existing record.
    Update,
    /// Append under a fresh push key.
    Push,
    /// Deletion.
    Remove,
}

/// Why an operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleViolation {
    /// The caller may not touch this location at all.
    #[error("permission denied: {user} may not {action} {path}")]
    PermissionDenied {
        /// Caller identity.
        user: String,
        /// `read` or `write`.
        action: &'static str,
        /// Target path.
        path: String,
    },

    /// Edit or delete of someone else's message.
    #[error("{user} is not the author of {path}")]
    NotAuthor {
        /// Caller identity.
        user: String,
        /// Message path.
        path: String,
    },

    /// Second edit of a message.
    #[error("message {0} has already been edited")]
    AlreadyEdited(String),

    /// Second read receipt for a message.
    #[error("message {0} has already been read")]
    AlreadyRead(String),

    /// Update or delete of a message that does not exist.
    #[error("no message at {0}")]
    NotFound(String),

    /// The new value has the wrong shape for its location.
    #[error("invalid value at {path}: {reason}")]
    InvalidValue {
        /// Target path.
        path: String,
        /// What is wrong.
        reason: String,
    },
}

/// Checks that `user` may read or subscribe to `path`.
///
/// # Errors
///
/// Returns [`RuleViolation::PermissionDenied`] for the password directory,
/// for listing whole subtrees, and for chats the user does not belong to.
pub fn authorize_read(user: &str, path: &Path) -> Result<(), RuleViolation> {
    let allowed = match path.location() {
        Location::ChatPairs(Some(_)) | Location::Status(_) => true,
        Location::Messages {
            chat: Some(chat), ..
        }
        | Location::Typing {
            chat: Some(chat), ..
        } => is_participant(chat, user),
        _ => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(denied(user, "read", path))
    }
}

/// Checks that `user` may change the value at `path` from `before` to `after`.
///
/// `after` is the full value the path will hold once the write commits.
///
/// # Errors
///
/// Returns the matching [`RuleViolation`] when the write is not allowed.
pub fn authorize_write(
    user: &str,
    path: &Path,
    kind: WriteKind,
    before: &Value,
    after: &Value,
) -> Result<(), RuleViolation> {
    match (path.location(), kind) {
        (Location::Status(Some(owner)), WriteKind::Set) if owner == user => {
            require_bool(path, after)
        }
        (
            Location::Typing {
                chat: Some(chat),
                user: Some(owner),
            },
            WriteKind::Set,
        ) if owner == user && is_participant(chat, user) => require_bool(path, after),
        (
            Location::Messages {
                chat: Some(chat),
                key: Some(_),
                field: None,
            },
            kind,
        ) if is_participant(chat, user) => match kind {
            WriteKind::Push => check_append(user, path, after),
            WriteKind::Update => check_update(user, path, before, after),
            WriteKind::Remove => check_remove(user, path, before),
            WriteKind::Set => Err(denied(user, "write", path)),
        },
        _ => Err(denied(user, "write", path)),
    }
}

fn check_append(user: &str, path: &Path, after: &Value) -> Result<(), RuleViolation> {
    let record = Message::from_value(after).map_err(|e| invalid(path, &e.to_string()))?;
    if record.author != user {
        return Err(RuleViolation::NotAuthor {
            user: user.to_string(),
            path: path.to_string(),
        });
    }
    if record.edited || record.read || record.read_timestamp.is_some() {
        return Err(invalid(path, "new messages start unedited and unread"));
    }
    message::validate_content(&record.content).map_err(|e| invalid(path, &e.to_string()))
}

fn check_update(
    user: &str,
    path: &Path,
    before: &Value,
    after: &Value,
) -> Result<(), RuleViolation> {
    if before.is_null() {
        return Err(RuleViolation::NotFound(path.to_string()));
    }
    let old = Message::from_value(before).map_err(|e| invalid(path, &e.to_string()))?;
    let new = Message::from_value(after).map_err(|e| invalid(path, &e.to_string()))?;
    let changed = changed_fields(before, after);

    if old.author == user {
        if !subset(&changed, &[message::CONTENT, message::EDITED]) {
            return Err(invalid(path, "authors may only change content"));
        }
        if old.edited {
            return Err(RuleViolation::AlreadyEdited(path.to_string()));
        }
        if !new.edited {
            return Err(invalid(path, "an edit must set the edited flag"));
        }
        return message::validate_content(&new.content).map_err(|e| invalid(path, &e.to_string()));
    }

    if !subset(&changed, &[message::READ, message::READ_TIMESTAMP]) {
        return Err(RuleViolation::NotAuthor {
            user: user.to_string(),
            path: path.to_string(),
        });
    }
    if old.read {
        return Err(RuleViolation::AlreadyRead(path.to_string()));
    }
    if !new.read {
        return Err(invalid(path, "a read receipt must set the read flag"));
    }
    Ok(())
}

fn check_remove(user: &str, path: &Path, before: &Value) -> Result<(), RuleViolation> {
    if before.is_null() {
        return Err(RuleViolation::NotFound(path.to_string()));
    }
    match before.field(message::ROLE).as_text() {
        Some(author) if author == user => Ok(()),
        _ => Err(RuleViolation::NotAuthor {
            user: user.to_string(),
            path: path.to_string(),
        }),
    }
}

fn changed_fields<'a>(before: &'a Value, after: &'a Value) -> BTreeSet<&'a str> {
    let keys = before
        .as_map()
        .into_iter()
        .flat_map(|m| m.keys())
        .chain(after.as_map().into_iter().flat_map(|m| m.keys()));
    keys.filter(|k| before.field(k) != after.field(k))
        .map(String::as_str)
        .collect()
}

fn subset(changed: &BTreeSet<&str>, allowed: &[&str]) -> bool {
    changed.iter().all(|f| allowed.contains(f))
}

fn is_participant(chat: &str, user: &str) -> bool {
    ChatId::parse(chat).is_ok_and(|c| c.contains(user))
}

fn require_bool(path: &Path, after: &Value) -> Result<(), RuleViolation> {
    if after.as_bool().is_some() {
        Ok(())
    } else {
        Err(invalid(path, "expected a boolean"))
    }
}

fn denied(user: &str, action: &'static str, path: &Path) -> RuleViolation {
    RuleViolation::PermissionDenied {
        user: user.to_string(),
        action,
        path: path.to_string(),
    }
}

fn invalid(path: &Path, reason: &str) -> RuleViolation {
    RuleViolation::InvalidValue {
        path: path.to_string(),
        reason: reason.to_string(),
    }
}
