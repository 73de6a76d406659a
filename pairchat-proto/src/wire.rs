//! Store wire protocol.
//!
//! Every WebSocket binary frame between a client and the store carries one
//! postcard-encoded [`StoreMessage`]. A connection starts with
//! [`StoreMessage::Register`]; afterwards the client sends numbered
//! [`StoreMessage::Request`]s and the store answers each with a
//! [`StoreMessage::Response`] carrying the same id. Subscription updates
//! arrive unprompted as [`StoreMessage::Snapshot`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::path::Path;
use crate::value::Value;

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Frames exchanged between store clients and the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMessage {
    /// First client frame: authenticate with a password.
    ///
    /// The store looks the password up in its directory and answers with
    /// [`StoreMessage::Registered`] or [`StoreMessage::Error`].
    Register {
        /// Plaintext password as entered by the user.
        password: String,
    },

    /// The store accepted the password.
    Registered {
        /// Identity the connection now acts as.
        user: String,
    },

    /// A keyspace operation from the client.
    Request {
        /// Client-chosen correlation id.
        id: u64,
        /// What to do.
        op: Op,
    },

    /// The store's answer to a [`StoreMessage::Request`].
    Response {
        /// Correlation id copied from the request.
        id: u64,
        /// Result of the operation.
        outcome: Outcome,
    },

    /// Current value of a subscribed path.
    ///
    /// Sent once right after subscribing and again after every change.
    Snapshot {
        /// Subscription id from [`Outcome::Subscribed`].
        sub: u64,
        /// Full value at the subscribed path.
        value: Value,
    },

    /// Connection-level error.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Keyspace operations a client can request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Read the value at a path once.
    Get {
        /// Where to read.
        path: Path,
    },
    /// Replace the value at a path (`Null` deletes).
    Set {
        /// Where to write.
        path: Path,
        /// New value.
        value: Value,
    },
    /// Merge single-segment children into the value at a path.
    Update {
        /// Record to update.
        path: Path,
        /// Children to replace.
        fields: BTreeMap<String, Value>,
    },
    /// Append a child under a store-generated, insertion-ordered key.
    Push {
        /// List to append to.
        path: Path,
        /// New child.
        value: Value,
    },
    /// Delete the value at a path.
    Remove {
        /// What to delete.
        path: Path,
    },
    /// Start receiving snapshots of a path.
    Subscribe {
        /// What to watch.
        path: Path,
    },
    /// Stop a subscription.
    Unsubscribe {
        /// Subscription id.
        sub: u64,
    },
    /// Ask the store to write `value` at `path` when this connection drops.
    OnDisconnectSet {
        /// Where to write.
        path: Path,
        /// Value to write.
        value: Value,
    },
}

/// Result of an [`Op`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// The operation was applied.
    Done,
    /// Answer to [`Op::Get`].
    Value(Value),
    /// Answer to [`Op::Push`].
    Pushed {
        /// Key of the new child.
        key: String,
    },
    /// Answer to [`Op::Subscribe`].
    Subscribed {
        /// Id used in subsequent [`StoreMessage::Snapshot`]s.
        sub: u64,
    },
    /// The store refused the operation.
    Rejected {
        /// Why.
        reason: String,
    },
}

/// Encodes a [`StoreMessage`] using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the message cannot be serialized.
pub fn encode(msg: &StoreMessage) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(msg).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a [`StoreMessage`] from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<StoreMessage, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
