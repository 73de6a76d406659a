//! `PairChat`: two-party chat client library.
//!
//! Everything shared between the two participants of a chat lives in the
//! realtime store: presence under `status/{user}`, typing flags under
//! `typing/{chatId}/{user}` and messages under `messages/{chatId}`. This
//! crate drives those keys through a [`backend::Backend`] and turns the
//! store's push subscriptions into [`chat::ChatEvent`]s.

pub mod backend;
pub mod chat;
pub mod config;
pub mod login;
pub mod messages;
pub mod presence;
pub mod typing;
pub mod view;
