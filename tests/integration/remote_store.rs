//! End-to-end tests over a real store server.
//!
//! Verifies:
//! 1. Two clients on separate WebSocket connections exchange messages.
//! 2. Read receipts and typing indicators travel through the server.
//! 3. Killing a client's connection flips it offline for the other side.
//! 4. The store enforces authorship even when the client-side checks are
//!    bypassed.
//! 5. Closing a session releases its store subscriptions while the
//!    connection stays up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pairchat::backend::remote::{RemoteBackend, RemoteConfig};
use pairchat::backend::{Backend, BackendError};
use pairchat::chat::{ChatEvent, ChatSession, SessionConfig};
use pairchat_proto::chat_id::ChatId;
use pairchat_proto::message::{Message, MessageEntry, Timestamp};
use pairchat_proto::path::Path;
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::typing::TypingState;
use pairchat_store::database::{Database, Directory};

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_store() -> String {
    start_store_with_db().await.0
}

async fn start_store_with_db() -> (String, Arc<Database>) {
    let directory = Directory {
        passwords: BTreeMap::from([
            ("alice".to_string(), "wonderland".to_string()),
            ("bob".to_string(), "builder".to_string()),
        ]),
        chat_pairs: BTreeMap::from([("1".to_string(), "alice_bob".to_string())]),
    };
    let db = Arc::new(Database::with_directory(&directory).unwrap());
    let (addr, _handle) = pairchat_store::server::start_server("127.0.0.1:0", Arc::clone(&db))
        .await
        .unwrap();
    (format!("ws://{addr}/ws"), db)
}

async fn connect(url: &str, password: &str) -> Arc<RemoteBackend> {
    Arc::new(
        RemoteBackend::connect(url, password, RemoteConfig::default())
            .await
            .unwrap(),
    )
}

async fn open(
    url: &str,
    password: &str,
) -> (ChatSession<RemoteBackend>, mpsc::Receiver<ChatEvent>) {
    ChatSession::open(connect(url, password).await, chat(), session_config())
        .await
        .unwrap()
}

fn session_config() -> SessionConfig {
    SessionConfig {
        typing_timeout: Duration::from_millis(300),
        ..SessionConfig::default()
    }
}

/// Polls the store until it holds `expected` subscriptions.
async fn wait_for_subscriptions(db: &Database, expected: usize) -> bool {
    for _ in 0..100 {
        if db.subscription_count().await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

fn chat() -> ChatId {
    ChatId::parse("alice_bob").unwrap()
}

/// Waits for the first event that `pick` maps to `Some`.
async fn wait_for<T>(
    events: &mut mpsc::Receiver<ChatEvent>,
    pick: impl Fn(ChatEvent) -> Option<T>,
) -> T {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

fn messages_where(
    done: impl Fn(&[MessageEntry]) -> bool,
) -> impl Fn(ChatEvent) -> Option<Vec<MessageEntry>> {
    move |event| match event {
        ChatEvent::MessagesChanged(entries) if done(&entries) => Some(entries),
        _ => None,
    }
}

fn presence(event: ChatEvent) -> Option<PresenceStatus> {
    match event {
        ChatEvent::RecipientPresence(status) => Some(status),
        _ => None,
    }
}

fn typing(event: ChatEvent) -> Option<TypingState> {
    match event {
        ChatEvent::RecipientTyping(state) => Some(state),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_round_trip_with_read_receipt() {
    let url = start_store().await;
    let (mut alice, mut alice_events) = open(&url, "wonderland").await;
    let (mut bob, mut bob_events) = open(&url, "builder").await;

    alice.submit("hi bob").await.unwrap();
    let seen = wait_for(&mut bob_events, messages_where(|e| !e.is_empty())).await;
    assert_eq!(seen[0].message.author, "alice");
    assert_eq!(seen[0].message.content, "hi bob");

    let receipt = wait_for(
        &mut alice_events,
        messages_where(|e| e.first().is_some_and(|m| m.message.read)),
    )
    .await;
    assert!(receipt[0].message.read_timestamp.is_some());

    bob.submit("hi alice").await.unwrap();
    let both = wait_for(&mut alice_events, messages_where(|e| e.len() == 2)).await;
    assert_eq!(both[1].message.author, "bob");
}

#[tokio::test]
async fn typing_travels_through_server() {
    let url = start_store().await;
    let (alice, _alice_events) = open(&url, "wonderland").await;
    let (_bob, mut bob_events) = open(&url, "builder").await;
    assert_eq!(wait_for(&mut bob_events, typing).await, TypingState::Idle);

    alice.draft_changed("hel");
    assert_eq!(wait_for(&mut bob_events, typing).await, TypingState::Typing);
    // The 300ms idle timeout ends it without further keystrokes.
    assert_eq!(wait_for(&mut bob_events, typing).await, TypingState::Idle);
}

#[tokio::test]
async fn dropped_client_goes_offline() {
    let url = start_store().await;
    let (_bob, mut bob_events) = open(&url, "builder").await;
    assert_eq!(
        wait_for(&mut bob_events, presence).await,
        PresenceStatus::Offline
    );

    let (alice, alice_events) = open(&url, "wonderland").await;
    assert_eq!(
        wait_for(&mut bob_events, presence).await,
        PresenceStatus::Online
    );

    // No close: dropping the session and its backend kills the socket.
    drop(alice);
    drop(alice_events);
    assert_eq!(
        wait_for(&mut bob_events, presence).await,
        PresenceStatus::Offline
    );
}

#[tokio::test]
async fn store_rejects_forged_edits() {
    let url = start_store().await;
    let (mut alice, _alice_events) = open(&url, "wonderland").await;
    let pairchat::chat::Submitted::Appended(key) = alice.submit("mine").await.unwrap() else {
        panic!("expected an append");
    };

    // Bob talks to the store directly, skipping the client checks.
    let bob = connect(&url, "builder").await;
    let path = Path::message(&chat(), &key).unwrap();
    let result = bob.update(&path, Message::edit_fields("forged")).await;
    assert!(matches!(result, Err(BackendError::Rejected(_))));
    let result = bob.remove(&path).await;
    assert!(matches!(result, Err(BackendError::Rejected(_))));

    let stored = Message::from_value(&bob.get(&path).await.unwrap()).unwrap();
    assert_eq!(stored.content, "mine");
    assert!(!stored.edited);
}

#[tokio::test]
async fn closed_backend_fails_requests() {
    let url = start_store().await;
    let alice = connect(&url, "wonderland").await;
    alice.close().await;

    let result = alice.get(&Path::status("bob").unwrap()).await;
    assert!(result.is_err());
    assert!(!alice.is_connected());
}

#[tokio::test]
async fn closed_session_releases_store_subscriptions() {
    let (url, db) = start_store_with_db().await;
    let alice = connect(&url, "wonderland").await;
    let (session, _events) = ChatSession::open(Arc::clone(&alice), chat(), session_config())
        .await
        .unwrap();
    assert!(wait_for_subscriptions(&db, 3).await);

    session.close().await;

    // Later traffic on the released paths must not revive anything.
    let bob = connect(&url, "builder").await;
    bob.push(
        &Path::messages(&chat()).unwrap(),
        Message::compose("bob", "still there?", Timestamp::now())
            .unwrap()
            .to_value(),
    )
    .await
    .unwrap();

    assert!(
        wait_for_subscriptions(&db, 0).await,
        "store still holds {} subscriptions",
        db.subscription_count().await
    );
    assert!(alice.is_connected());
}
