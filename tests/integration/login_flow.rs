//! Integration tests for login.
//!
//! Verifies:
//! 1. A password identifies the user and a chat number resolves the pairing.
//! 2. A wrong password, an unknown chat number, and a chat the user is not
//!    part of are each refused with their own error.
//! 3. The same flow works against a real store server over WebSocket.

use std::collections::BTreeMap;
use std::sync::Arc;

use pairchat::backend::Backend;
use pairchat::backend::memory::MemoryConnector;
use pairchat::backend::remote::{RemoteConfig, RemoteConnector};
use pairchat::chat::{ChatSession, SessionConfig};
use pairchat::login::{LoginError, login};
use pairchat_proto::path::Path;
use pairchat_proto::value::Value;
use pairchat_store::database::{Database, Directory};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn database() -> Arc<Database> {
    let directory = Directory {
        passwords: BTreeMap::from([
            ("alice".to_string(), "wonderland".to_string()),
            ("bob".to_string(), "builder".to_string()),
            ("carol".to_string(), "singer".to_string()),
        ]),
        chat_pairs: BTreeMap::from([
            ("1".to_string(), "alice_bob".to_string()),
            ("2".to_string(), "bob_carol".to_string()),
        ]),
    };
    Arc::new(Database::with_directory(&directory).unwrap())
}

async fn store_url(db: &Arc<Database>) -> String {
    let (addr, _handle) = pairchat_store::server::start_server("127.0.0.1:0", Arc::clone(db))
        .await
        .unwrap();
    format!("ws://{addr}/ws")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_then_open_chat() {
    let db = database();
    let connector = MemoryConnector::new(Arc::clone(&db));

    let logged_in = login(&connector, "wonderland", "1").await.unwrap();
    assert_eq!(logged_in.backend.user(), "alice");
    assert_eq!(logged_in.chat.as_str(), "alice_bob");

    let (session, _events) = ChatSession::open(
        Arc::new(logged_in.backend),
        logged_in.chat,
        SessionConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(session.recipient(), "bob");
    assert_eq!(
        db.peek(&Path::status("alice").unwrap()).await,
        Value::Bool(true)
    );
}

#[tokio::test]
async fn same_user_in_two_chats() {
    let connector = MemoryConnector::new(database());

    let first = login(&connector, "builder", "1").await.unwrap();
    let second = login(&connector, "builder", "2").await.unwrap();
    assert_eq!(first.chat.recipient_for("bob").unwrap(), "alice");
    assert_eq!(second.chat.recipient_for("bob").unwrap(), "carol");
}

#[tokio::test]
async fn wrong_password_is_refused() {
    let connector = MemoryConnector::new(database());
    let result = login(&connector, "letmein", "1").await;
    assert!(matches!(result, Err(LoginError::WrongPassword)));
}

#[tokio::test]
async fn unknown_chat_number_is_refused() {
    let connector = MemoryConnector::new(database());
    let result = login(&connector, "wonderland", "404").await;
    assert!(matches!(result, Err(LoginError::UnknownChat(code)) if code == "404"));
}

#[tokio::test]
async fn outsider_is_refused() {
    let connector = MemoryConnector::new(database());
    let result = login(&connector, "wonderland", "2").await;
    assert!(matches!(
        result,
        Err(LoginError::NotAParticipant { user, chat })
            if user == "alice" && chat.as_str() == "bob_carol"
    ));
}

#[tokio::test]
async fn login_over_websocket() {
    let db = database();
    let connector = RemoteConnector::new(store_url(&db).await, RemoteConfig::default());

    let logged_in = login(&connector, "builder", " 1 ").await.unwrap();
    assert_eq!(logged_in.backend.user(), "bob");
    assert_eq!(logged_in.chat.as_str(), "alice_bob");
    assert!(logged_in.backend.is_connected());
}

#[tokio::test]
async fn wrong_password_over_websocket() {
    let db = database();
    let connector = RemoteConnector::new(store_url(&db).await, RemoteConfig::default());

    let result = login(&connector, "letmein", "1").await;
    assert!(matches!(result, Err(LoginError::WrongPassword)));
}

#[tokio::test]
async fn unreachable_store_is_a_backend_error() {
    let connector = RemoteConnector::new("ws://127.0.0.1:1/ws", RemoteConfig::default());
    let result = login(&connector, "wonderland", "1").await;
    assert!(matches!(result, Err(LoginError::Backend(_))));
}
