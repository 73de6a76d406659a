//! `PairChat` realtime store library.
//!
//! Exposes the in-memory [`database::Database`] (keyspace tree, push
//! subscriptions, disconnect hooks, write rules) and the WebSocket
//! [`server`] in front of it, for use by the binary, by embedded clients
//! and by tests.

pub mod config;
pub mod database;
pub mod rules;
pub mod server;
