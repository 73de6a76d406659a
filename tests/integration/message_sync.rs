//! Integration tests for message sync between two open chats.
//!
//! Verifies:
//! 1. Each side resolves the other participant from the chat id.
//! 2. A sent message reaches the other side in key order.
//! 3. The recipient's feed marks it read, and the author sees the receipt.
//! 4. Edits happen once, by the author only.
//! 5. Deletes need the author and a confirmation.
//! 6. A detached send validates up front and writes only when driven.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use pairchat::backend::memory::MemoryBackend;
use pairchat::chat::{ChatEvent, ChatSession, SessionConfig, Submitted};
use pairchat::messages::{Confirm, MessageError, MessageLog};
use pairchat_proto::chat_id::ChatId;
use pairchat_proto::message::{Message, MessageEntry};
use pairchat_proto::path::Path;
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

async fn open(
    db: &Arc<Database>,
    password: &str,
) -> (ChatSession<MemoryBackend>, mpsc::Receiver<ChatEvent>) {
    ChatSession::open(connect(db, password).await, chat(), SessionConfig::default())
        .await
        .unwrap()
}

/// Waits for a message list that satisfies `done`, skipping everything else.
async fn wait_for_messages(
    events: &mut mpsc::Receiver<ChatEvent>,
    done: impl Fn(&[MessageEntry]) -> bool,
) -> Vec<MessageEntry> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Some(ChatEvent::MessagesChanged(entries)) if done(&entries) => return entries,
                Some(_) => {}
                None => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for messages")
}

struct Answer(bool);

impl Confirm for Answer {
    async fn confirm_delete(&self, _message: &Message) -> bool {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recipient_is_the_other_participant() {
    let db = database();
    let (alice, _alice_events) = open(&db, "wonderland").await;
    let (bob, _bob_events) = open(&db, "builder").await;

    assert_eq!(alice.user(), "alice");
    assert_eq!(alice.recipient(), "bob");
    assert_eq!(bob.user(), "bob");
    assert_eq!(bob.recipient(), "alice");
    assert_eq!(alice.chat().as_str(), "alice_bob");
}

#[tokio::test]
async fn sent_message_is_read_by_recipient() {
    let db = database();
    let (mut alice, mut alice_events) = open(&db, "wonderland").await;
    let (_bob, mut bob_events) = open(&db, "builder").await;

    let Submitted::Appended(key) = alice.submit("hi").await.unwrap() else {
        panic!("expected an append");
    };

    let seen = wait_for_messages(&mut bob_events, |entries| !entries.is_empty()).await;
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, key);
    assert_eq!(seen[0].message.author, "alice");
    assert_eq!(seen[0].message.content, "hi");

    // Bob's feed marks it read; alice sees the receipt arrive.
    let receipt = wait_for_messages(&mut alice_events, |entries| {
        entries.first().is_some_and(|e| e.message.read)
    })
    .await;
    let message = &receipt[0].message;
    assert!(message.read_timestamp.is_some());
    assert!(message.read_timestamp >= Some(message.sent_timestamp));
}

#[tokio::test]
async fn own_messages_stay_unread() {
    let db = database();
    let (mut alice, mut alice_events) = open(&db, "wonderland").await;

    let Submitted::Appended(key) = alice.submit("talking to myself").await.unwrap() else {
        panic!("expected an append");
    };
    wait_for_messages(&mut alice_events, |entries| !entries.is_empty()).await;

    let log = MessageLog::new(connect(&db, "wonderland").await, chat());
    assert!(!log.fetch(&key).await.unwrap().read);
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let db = database();
    let (mut alice, _alice_events) = open(&db, "wonderland").await;
    let (mut bob, mut bob_events) = open(&db, "builder").await;

    alice.submit("one").await.unwrap();
    bob.submit("two").await.unwrap();
    alice.submit("three").await.unwrap();

    let entries = wait_for_messages(&mut bob_events, |entries| entries.len() == 3).await;
    let contents: Vec<_> = entries.iter().map(|e| e.message.content.as_str()).collect();
    assert_eq!(contents, ["one", "two", "three"]);
}

#[tokio::test]
async fn edit_replaces_content_once() {
    let db = database();
    let (mut alice, mut alice_events) = open(&db, "wonderland").await;

    let Submitted::Appended(key) = alice.submit("helo").await.unwrap() else {
        panic!("expected an append");
    };

    assert_eq!(alice.start_edit(&key).await.unwrap(), "helo");
    assert_eq!(alice.editing(), Some(key.as_str()));
    assert_eq!(
        alice.submit("hello").await.unwrap(),
        Submitted::Edited(key.clone())
    );
    assert_eq!(alice.editing(), None);

    let entries = wait_for_messages(&mut alice_events, |entries| {
        entries.first().is_some_and(|e| e.message.edited)
    })
    .await;
    assert_eq!(entries[0].message.content, "hello");

    // Second edit is refused and nothing changes.
    let result = alice.start_edit(&key).await;
    assert!(matches!(result, Err(MessageError::AlreadyEdited)));
    assert_eq!(alice.editing(), None);

    let log = MessageLog::new(connect(&db, "wonderland").await, chat());
    let stored = log.fetch(&key).await.unwrap();
    assert_eq!(stored.content, "hello");
    assert!(stored.edited);
}

#[tokio::test]
async fn concurrent_edit_ends_edit_mode() {
    let db = database();
    let (mut alice, _alice_events) = open(&db, "wonderland").await;

    let Submitted::Appended(key) = alice.submit("first draft").await.unwrap() else {
        panic!("expected an append");
    };
    alice.start_edit(&key).await.unwrap();

    // Same user, another device, edits first.
    let other_device = MessageLog::new(connect(&db, "wonderland").await, chat());
    other_device.edit(&key, "from the phone").await.unwrap();

    let result = alice.submit("from the laptop").await;
    assert!(matches!(result, Err(MessageError::AlreadyEdited)));
    assert_eq!(alice.editing(), None);
    assert_eq!(
        other_device.fetch(&key).await.unwrap().content,
        "from the phone"
    );
}

#[tokio::test]
async fn only_the_author_edits_or_deletes() {
    let db = database();
    let (mut alice, _alice_events) = open(&db, "wonderland").await;
    let (mut bob, _bob_events) = open(&db, "builder").await;

    let Submitted::Appended(key) = alice.submit("mine").await.unwrap() else {
        panic!("expected an append");
    };

    assert!(matches!(
        bob.start_edit(&key).await,
        Err(MessageError::NotAuthor { action: "edit" })
    ));
    assert_eq!(bob.editing(), None);
    assert!(matches!(
        bob.delete(&key, &Answer(true)).await,
        Err(MessageError::NotAuthor { action: "delete" })
    ));

    let log = MessageLog::new(connect(&db, "wonderland").await, chat());
    assert_eq!(log.fetch(&key).await.unwrap().content, "mine");
}

#[tokio::test]
async fn delete_after_confirmation_reaches_recipient() {
    let db = database();
    let (mut alice, _alice_events) = open(&db, "wonderland").await;
    let (_bob, mut bob_events) = open(&db, "builder").await;

    let Submitted::Appended(key) = alice.submit("oops").await.unwrap() else {
        panic!("expected an append");
    };
    wait_for_messages(&mut bob_events, |entries| entries.len() == 1).await;

    assert!(!alice.delete(&key, &Answer(false)).await.unwrap());
    assert!(alice.delete(&key, &Answer(true)).await.unwrap());

    let entries = wait_for_messages(&mut bob_events, <[MessageEntry]>::is_empty).await;
    assert!(entries.is_empty());
}

#[tokio::test]
async fn blank_submit_is_rejected() {
    let db = database();
    let (mut alice, _alice_events) = open(&db, "wonderland").await;

    assert!(matches!(
        alice.submit("   ").await,
        Err(MessageError::Validation(_))
    ));
}

#[tokio::test]
async fn detached_send_returns_before_the_write() {
    let db = database();
    let (alice, _alice_events) = open(&db, "wonderland").await;
    let (_bob, mut bob_events) = open(&db, "builder").await;

    let write = alice.send_detached("hi bob").unwrap();
    assert!(db.peek(&Path::messages(&chat()).unwrap()).await.is_null());

    let key = tokio::spawn(write).await.unwrap().unwrap();
    let seen = wait_for_messages(&mut bob_events, |e| !e.is_empty()).await;
    assert_eq!(seen[0].key, key);
    assert_eq!(seen[0].message.content, "hi bob");
}

#[tokio::test]
async fn detached_send_rejects_blank_content_at_once() {
    let db = database();
    let (alice, _alice_events) = open(&db, "wonderland").await;

    assert!(matches!(
        alice.send_detached("  \n"),
        Err(MessageError::Validation(_))
    ));
    assert!(db.peek(&Path::messages(&chat()).unwrap()).await.is_null());
}
