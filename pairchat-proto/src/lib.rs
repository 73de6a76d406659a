//! Shared data model and store wire protocol for `PairChat`.
//!
//! Everything both the store and its clients must agree on lives here:
//! chat pairings, keyspace paths, the [`value::Value`] tree, message
//! records, presence and typing values, and the postcard-encoded
//! [`wire::StoreMessage`] frames.

pub mod chat_id;
pub mod message;
pub mod path;
pub mod presence;
pub mod typing;
pub mod value;
pub mod wire;
