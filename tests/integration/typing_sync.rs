//! Integration tests for typing indicators.
//!
//! Verifies:
//! 1. A keystroke with a non-empty draft shows the sender as typing.
//! 2. The indicator clears once the timeout passes without keystrokes.
//! 3. Every keystroke pushes the timeout back.
//! 4. Clearing the draft clears the indicator at once.
//! 5. Sending and closing both clear the indicator.
//!
//! Timer tests run on a paused tokio clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pairchat::backend::memory::MemoryBackend;
use pairchat::chat::{ChatEvent, ChatSession, SessionConfig};
use pairchat_proto::chat_id::ChatId;
use pairchat_proto::path::Path;
use pairchat_proto::typing::TypingState;
use pairchat_proto::value::Value;
use pairchat_store::database::{Database, Directory};

use tokio::sync::mpsc;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Pair {
    db: Arc<Database>,
    alice: ChatSession<MemoryBackend>,
    bob_events: mpsc::Receiver<ChatEvent>,
    _alice_events: mpsc::Receiver<ChatEvent>,
    _bob: ChatSession<MemoryBackend>,
}

async fn open_pair() -> Pair {
    let directory = Directory {
        passwords: BTreeMap::from([
            ("alice".to_string(), "wonderland".to_string()),
            ("bob".to_string(), "builder".to_string()),
        ]),
        chat_pairs: BTreeMap::new(),
    };
    let db = Arc::new(Database::with_directory(&directory).unwrap());
    let chat = ChatId::parse("alice_bob").unwrap();
    let config = SessionConfig {
        typing_timeout: TIMEOUT,
        ..SessionConfig::default()
    };

    let alice = MemoryBackend::connect(Arc::clone(&db), "wonderland")
        .await
        .unwrap();
    let bob = MemoryBackend::connect(Arc::clone(&db), "builder")
        .await
        .unwrap();
    let (alice, alice_events) = ChatSession::open(Arc::new(alice), chat.clone(), config)
        .await
        .unwrap();
    let (bob, mut bob_events) = ChatSession::open(Arc::new(bob), chat, config)
        .await
        .unwrap();

    assert_eq!(next_typing(&mut bob_events).await, TypingState::Idle);

    Pair {
        db,
        alice,
        bob_events,
        _alice_events: alice_events,
        _bob: bob,
    }
}

/// Waits for the next typing event, skipping other events.
async fn next_typing(events: &mut mpsc::Receiver<ChatEvent>) -> TypingState {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match events.recv().await {
                Some(ChatEvent::RecipientTyping(state)) => return state,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for typing state")
}

fn alice_typing_key() -> Path {
    Path::typing(&ChatId::parse("alice_bob").unwrap(), "alice").unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn typing_shows_then_times_out() {
    let mut pair = open_pair().await;

    let started = Instant::now();
    pair.alice.draft_changed("h");
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Typing);

    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Idle);
    let elapsed = started.elapsed();
    assert!(elapsed >= TIMEOUT, "cleared too early: {elapsed:?}");
    assert!(elapsed < TIMEOUT + Duration::from_millis(100), "cleared too late: {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn keystrokes_push_the_timeout_back() {
    let mut pair = open_pair().await;

    pair.alice.draft_changed("h");
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Typing);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    let last_keystroke = Instant::now();
    pair.alice.draft_changed("he");

    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Idle);
    assert!(last_keystroke.elapsed() >= TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn empty_draft_clears_immediately() {
    let mut pair = open_pair().await;

    pair.alice.draft_changed("hi");
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Typing);

    let cleared_at = Instant::now();
    pair.alice.draft_changed("");
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Idle);
    assert!(cleared_at.elapsed() < Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn submit_clears_indicator() {
    let mut pair = open_pair().await;

    pair.alice.draft_changed("hello");
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Typing);

    pair.alice.submit("hello").await.unwrap();
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Idle);
}

#[tokio::test(start_paused = true)]
async fn close_clears_indicator() {
    let mut pair = open_pair().await;

    pair.alice.draft_changed("half a thought");
    assert_eq!(next_typing(&mut pair.bob_events).await, TypingState::Typing);

    let db = Arc::clone(&pair.db);
    pair.alice.close().await;
    assert_eq!(db.peek(&alice_typing_key()).await, Value::Bool(false));
}
