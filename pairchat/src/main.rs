//! `PairChat`: two-party terminal chat.
//!
//! Logs in against a `pairchat-store` server, opens the chat and shows it
//! full-screen. Every keystroke updates the typing indicator; Enter sends.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/pairchat/config.toml`).
//!
//! ```bash
//! cargo run --bin pairchat -- --store-url ws://127.0.0.1:9100/ws --chat 1
//!
//! # Or via environment variables
//! PAIRCHAT_STORE_URL=ws://127.0.0.1:9100/ws PAIRCHAT_CHAT=1 cargo run --bin pairchat
//! ```
//!
//! In the chat: `/edit N`, `/delete N`, `/cancel` (or Esc), `/quit` (or Ctrl-C).

use std::future::Future;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::Print;
use crossterm::terminal::{
    Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode,
    enable_raw_mode,
};
use crossterm::{execute, queue};
use tokio::sync::{Mutex, mpsc};
use tracing_appender::non_blocking::WorkerGuard;

use pairchat::backend::Backend;
use pairchat::backend::remote::RemoteConnector;
use pairchat::chat::{ChatEvent, ChatSession};
use pairchat::config::{CliArgs, ClientConfig};
use pairchat::login::{LoginError, login};
use pairchat::messages::{Confirm, MessageError};
use pairchat::view::{ChatView, Command};
use pairchat_proto::message::Message;

/// How often the key reader checks whether the chat has ended.
const KEY_POLL_INTERVAL: Duration = Duration::from_millis(100);

type Keys = Mutex<mpsc::UnboundedReceiver<KeyEvent>>;

/// A message whose background append failed.
struct SendFailure {
    draft: String,
    error: MessageError,
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file, never stdout, since the chat owns the terminal.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("pairchat starting");

    let connector = RemoteConnector::new(config.store_url.clone(), config.remote_config());
    let prompt_password = config.password.is_none();
    let prompt_chat = config.chat_number.is_none();
    let logged_in = loop {
        let password = match config.password.clone() {
            Some(p) => p,
            None => prompt("Password: ")?,
        };
        let chat_number = match config.chat_number.clone() {
            Some(n) => n,
            None => prompt("Chat number: ")?,
        };

        match login(&connector, &password, &chat_number).await {
            Ok(l) => break l,
            Err(e @ LoginError::WrongPassword) if prompt_password => {
                eprintln!("Login failed: {e}. Try again.");
            }
            Err(e @ (LoginError::UnknownChat(_) | LoginError::NotAParticipant { .. }))
                if prompt_chat =>
            {
                eprintln!("Login failed: {e}. Try again.");
            }
            Err(e) => {
                eprintln!("Login failed: {e}");
                std::process::exit(1);
            }
        }
    };

    let backend = Arc::new(logged_in.backend);
    let (session, events) =
        match ChatSession::open(backend, logged_in.chat, config.session_config()).await {
            Ok(opened) => opened,
            Err(e) => {
                eprintln!("Could not open chat: {e}");
                std::process::exit(1);
            }
        };

    enable_raw_mode()?;
    execute!(io::stdout(), EnterAlternateScreen)?;

    let result = run_chat(session, events).await;

    disable_raw_mode()?;
    execute!(io::stdout(), LeaveAlternateScreen)?;

    tracing::info!("pairchat exiting");
    result
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("pairchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Reads one trimmed line from stdin after printing `label`.
fn prompt(label: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{label}")?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Whether the chat loop keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Main chat loop: redraws on every session event and keystroke.
async fn run_chat<B: Backend + 'static>(
    mut session: ChatSession<B>,
    mut events: mpsc::Receiver<ChatEvent>,
) -> io::Result<()> {
    let mut view = ChatView::new(session.user(), session.recipient());
    let keys: Keys = Mutex::new(spawn_key_reader());
    let (failures, mut failed) = mpsc::unbounded_channel::<SendFailure>();
    let mut events_open = true;

    render(&view)?;
    loop {
        tokio::select! {
            event = events.recv(), if events_open => match event {
                Some(event) => view.apply(event),
                None => {
                    events_open = false;
                    view.set_notice("lost connection to the store");
                }
            },
            Some(failure) = failed.recv() => {
                view.set_notice(format!("not sent: {}", failure.error));
                if view.draft.is_empty() && !view.editing {
                    view.draft = failure.draft;
                    session.draft_changed(typing_text(&view.draft));
                }
            }
            key = next_key(&keys) => {
                let Some(key) = key else { break };
                let flow = handle_key(&mut session, &mut view, key, &keys, &failures).await;
                if flow == Flow::Quit {
                    break;
                }
            }
        }
        render(&view)?;
    }

    session.close().await;
    Ok(())
}

async fn next_key(keys: &Keys) -> Option<KeyEvent> {
    keys.lock().await.recv().await
}

/// Applies one keystroke to the draft or runs the typed command.
async fn handle_key<B: Backend + 'static>(
    session: &mut ChatSession<B>,
    view: &mut ChatView,
    key: KeyEvent,
    keys: &Keys,
    failures: &mpsc::UnboundedSender<SendFailure>,
) -> Flow {
    if key.kind != KeyEventKind::Press {
        return Flow::Continue;
    }
    match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Flow::Quit,
        KeyCode::Char(c) => {
            view.draft.push(c);
            session.draft_changed(typing_text(&view.draft));
        }
        KeyCode::Backspace => {
            view.draft.pop();
            session.draft_changed(typing_text(&view.draft));
        }
        KeyCode::Esc if view.editing => {
            session.cancel_edit();
            view.editing = false;
            view.draft.clear();
            session.draft_changed("");
        }
        KeyCode::Enter => {
            let line = std::mem::take(&mut view.draft);
            view.clear_notice();
            match Command::parse(&line) {
                Some(Ok(command)) => return run_command(session, view, command, keys).await,
                Some(Err(usage)) => view.set_notice(usage),
                None if session.editing().is_none() => match session.send_detached(&line) {
                    Ok(write) => spawn_send(write, line, failures.clone()),
                    Err(e) => {
                        view.set_notice(e.to_string());
                        view.draft = line;
                    }
                },
                None => {
                    if let Err(e) = render(view) {
                        tracing::debug!(error = %e, "redraw before edit failed");
                    }
                    if let Err(e) = session.submit(&line).await {
                        view.set_notice(e.to_string());
                        view.draft = line;
                    }
                    view.editing = session.editing().is_some();
                }
            }
            session.draft_changed(typing_text(&view.draft));
        }
        _ => {}
    }
    Flow::Continue
}

/// Runs an append in the background; a failure comes back on `failures`
/// with the draft so the user can retry.
fn spawn_send(
    write: impl Future<Output = Result<String, MessageError>> + Send + 'static,
    draft: String,
    failures: mpsc::UnboundedSender<SendFailure>,
) {
    tokio::spawn(async move {
        if let Err(error) = write.await {
            tracing::warn!(error = %error, "send failed");
            if failures.send(SendFailure { draft, error }).is_err() {
                tracing::debug!("chat loop gone, dropping send failure");
            }
        }
    });
}

async fn run_command<B: Backend + 'static>(
    session: &mut ChatSession<B>,
    view: &mut ChatView,
    command: Command,
    keys: &Keys,
) -> Flow {
    match command {
        Command::Quit => return Flow::Quit,
        Command::Cancel => {
            session.cancel_edit();
            view.editing = false;
        }
        Command::Edit(number) => match view.key_at(number).map(str::to_string) {
            Some(key) => match session.start_edit(&key).await {
                Ok(content) => view.draft = content,
                Err(e) => view.set_notice(e.to_string()),
            },
            None => view.set_notice(format!("no message number {number}")),
        },
        Command::Delete(number) => match view.key_at(number).map(str::to_string) {
            Some(key) => match session.delete(&key, &KeyConfirm { keys }).await {
                Ok(true) => view.set_notice("message deleted"),
                Ok(false) => {}
                Err(e @ MessageError::NotAuthor { .. }) => view.set_notice(e.to_string()),
                Err(e) => {
                    tracing::warn!(error = %e, "delete failed");
                    view.set_notice(e.to_string());
                }
            },
            None => view.set_notice(format!("no message number {number}")),
        },
    }
    view.editing = session.editing().is_some();
    Flow::Continue
}

/// Drafts that are commands do not count as typing.
fn typing_text(draft: &str) -> &str {
    if draft.trim_start().starts_with('/') {
        ""
    } else {
        draft
    }
}

/// Asks for delete confirmation with a single y/n keystroke.
struct KeyConfirm<'a> {
    keys: &'a Keys,
}

impl Confirm for KeyConfirm<'_> {
    async fn confirm_delete(&self, message: &Message) -> bool {
        let question = format!("\r\nDelete \"{}\"? (y/n) ", message.content);
        if execute!(io::stdout(), Print(question)).is_err() {
            return false;
        }
        let mut keys = self.keys.lock().await;
        while let Some(key) = keys.recv().await {
            if key.kind == KeyEventKind::Press {
                return matches!(key.code, KeyCode::Char('y' | 'Y'));
            }
        }
        false
    }
}

/// Reads terminal key events on a blocking thread until the receiver is
/// dropped.
fn spawn_key_reader() -> mpsc::UnboundedReceiver<KeyEvent> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::task::spawn_blocking(move || {
        while !tx.is_closed() {
            match event::poll(KEY_POLL_INTERVAL) {
                Ok(true) => match event::read() {
                    Ok(Event::Key(key)) => {
                        if tx.send(key).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "terminal read failed");
                        break;
                    }
                },
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "terminal poll failed");
                    break;
                }
            }
        }
    });
    rx
}

/// Clears the screen and prints the view.
fn render(view: &ChatView) -> io::Result<()> {
    let mut stdout = io::stdout();
    queue!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
    for line in view.lines() {
        queue!(stdout, Print(line), Print("\r\n"))?;
    }
    stdout.flush()
}
