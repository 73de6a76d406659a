//! Integration tests for presence.
//!
//! Verifies:
//! 1. Opening a chat publishes the user as online.
//! 2. Closing a chat publishes the user as offline.
//! 3. A dropped connection flips the user offline through the store's
//!    disconnect hook.
//! 4. The other participant's session reports each change as an event.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pairchat::backend::memory::MemoryBackend;
use pairchat::chat::{ChatEvent, ChatSession, SessionConfig};
use pairchat_proto::chat_id::ChatId;
use pairchat_proto::path::Path;
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::value::Value;
use pairchat_store::database::{Database, Directory};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn database() -> Arc<Database> {
    let directory = Directory {
        passwords: BTreeMap::from([
            ("alice".to_string(), "wonderland".to_string()),
            ("bob".to_string(), "builder".to_string()),
        ]),
        chat_pairs: BTreeMap::from([("1".to_string(), "alice_bob".to_string())]),
    };
    Arc::new(Database::with_directory(&directory).unwrap())
}

async fn connect(db: &Arc<Database>, password: &str) -> Arc<MemoryBackend> {
    Arc::new(MemoryBackend::connect(Arc::clone(db), password).await.unwrap())
}

fn chat() -> ChatId {
    ChatId::parse("alice_bob").unwrap()
}

/// Waits for the next presence event, skipping other events.
async fn next_presence(events: &mut mpsc::Receiver<ChatEvent>) -> PresenceStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(ChatEvent::RecipientPresence(status)) => return status,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for presence")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_publishes_online() {
    let db = database();
    let alice = connect(&db, "wonderland").await;

    let (_session, _events) = ChatSession::open(alice, chat(), SessionConfig::default())
        .await
        .unwrap();

    assert_eq!(
        db.peek(&Path::status("alice").unwrap()).await,
        Value::Bool(true)
    );
}

#[tokio::test]
async fn recipient_sees_online_then_offline_on_close() {
    let db = database();
    let bob = connect(&db, "builder").await;
    let (_bob_session, mut bob_events) = ChatSession::open(bob, chat(), SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(next_presence(&mut bob_events).await, PresenceStatus::Offline);

    let alice = connect(&db, "wonderland").await;
    let (alice_session, _alice_events) =
        ChatSession::open(alice, chat(), SessionConfig::default())
            .await
            .unwrap();
    assert_eq!(next_presence(&mut bob_events).await, PresenceStatus::Online);

    alice_session.close().await;
    assert_eq!(next_presence(&mut bob_events).await, PresenceStatus::Offline);
}

#[tokio::test]
async fn dropped_connection_goes_offline() {
    let db = database();
    let alice = connect(&db, "wonderland").await;
    let (_alice_session, _alice_events) =
        ChatSession::open(Arc::clone(&alice), chat(), SessionConfig::default())
            .await
            .unwrap();

    let bob = connect(&db, "builder").await;
    let (_bob_session, mut bob_events) = ChatSession::open(bob, chat(), SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(next_presence(&mut bob_events).await, PresenceStatus::Online);

    // No clean close: the store's hook has to do it.
    alice.disconnect().await;
    assert_eq!(next_presence(&mut bob_events).await, PresenceStatus::Offline);
}

#[tokio::test]
async fn clean_close_wins_over_later_hook() {
    let db = database();
    let alice = connect(&db, "wonderland").await;
    let (session, _events) =
        ChatSession::open(Arc::clone(&alice), chat(), SessionConfig::default())
            .await
            .unwrap();
    session.close().await;
    alice.disconnect().await;

    assert_eq!(
        db.peek(&Path::status("alice").unwrap()).await,
        Value::Bool(false)
    );
}

#[tokio::test]
async fn user_cannot_publish_someone_elses_presence() {
    use pairchat::backend::{Backend, BackendError};

    let db = database();
    let bob = connect(&db, "builder").await;
    let result = bob
        .set(&Path::status("alice").unwrap(), Value::Bool(true))
        .await;
    assert!(matches!(result, Err(BackendError::Rejected(_))));
}
