//! `PairChat` store server: the realtime keyspace behind every chat.
//!
//! An axum WebSocket server that authenticates clients by password and
//! serves reads, writes, push subscriptions and disconnect hooks over the
//! `passwords`, `chatPairs`, `messages`, `status` and `typing` subtrees.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:9100
//! cargo run --bin pairchat-store
//!
//! # Run on custom address with an explicit directory file
//! cargo run --bin pairchat-store -- --bind 127.0.0.1:8080 --config store.toml
//!
//! # Or via environment variable
//! PAIRCHAT_STORE_ADDR=127.0.0.1:8080 cargo run --bin pairchat-store
//! ```

use std::sync::Arc;

use clap::Parser;
use pairchat_store::config::{StoreCliArgs, StoreConfig};
use pairchat_store::database::Database;
use pairchat_store::server::{self, StoreState};

#[tokio::main]
async fn main() {
    let cli = StoreCliArgs::parse();

    let config = match StoreConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let db = match Database::with_directory(&config.directory) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            tracing::error!(error = %e, "invalid directory configuration");
            std::process::exit(1);
        }
    };
    tracing::info!(
        addr = %config.bind_addr,
        users = config.directory.passwords.len(),
        chats = config.directory.chat_pairs.len(),
        "starting pairchat store"
    );

    let state = Arc::new(StoreState::with_config(config.max_payload_size, db));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "store server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "store server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start store server");
            std::process::exit(1);
        }
    }
}
