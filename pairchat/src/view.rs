//! Terminal view state for the chat binary.
//!
//! [`ChatView`] folds [`ChatEvent`]s and local input into plain text lines;
//! the binary only clears the screen and prints them. [`Command`] parses the
//! slash commands typed into the draft line.

use pairchat_proto::message::MessageEntry;
use pairchat_proto::presence::PresenceStatus;
use pairchat_proto::typing::TypingState;

use crate::chat::ChatEvent;

/// A slash command typed into the draft line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/edit N`: edit the N-th listed message.
    Edit(usize),
    /// `/delete N`: delete the N-th listed message.
    Delete(usize),
    /// `/cancel`: leave edit mode.
    Cancel,
    /// `/quit`: leave the chat.
    Quit,
}

impl Command {
    /// Parses a draft line. Returns `None` for lines that are not commands,
    /// and `Some(Err(usage))` for malformed commands.
    #[must_use]
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let number = words.next().map(str::parse::<usize>);
        Some(match (name, number) {
            ("edit", Some(Ok(n))) if n > 0 => Ok(Self::Edit(n)),
            ("delete", Some(Ok(n))) if n > 0 => Ok(Self::Delete(n)),
            ("edit" | "delete", _) => Err(format!("usage: /{name} <message number>")),
            ("cancel", None) => Ok(Self::Cancel),
            ("quit", None) => Ok(Self::Quit),
            _ => Err(format!("unknown command: /{rest}")),
        })
    }
}

/// Everything the chat screen shows.
#[derive(Debug, Clone)]
pub struct ChatView {
    user: String,
    recipient: String,
    messages: Vec<MessageEntry>,
    presence: PresenceStatus,
    recipient_typing: TypingState,
    /// The line being typed.
    pub draft: String,
    /// Whether the draft replaces an existing message.
    pub editing: bool,
    notice: Option<String>,
}

impl ChatView {
    /// Creates an empty view for `user` chatting with `recipient`.
    #[must_use]
    pub fn new(user: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            recipient: recipient.into(),
            messages: Vec::new(),
            presence: PresenceStatus::Offline,
            recipient_typing: TypingState::Idle,
            draft: String::new(),
            editing: false,
            notice: None,
        }
    }

    /// Applies a session event.
    pub fn apply(&mut self, event: ChatEvent) {
        match event {
            ChatEvent::MessagesChanged(entries) => self.messages = entries,
            ChatEvent::RecipientPresence(status) => self.presence = status,
            ChatEvent::RecipientTyping(state) => self.recipient_typing = state,
        }
    }

    /// Shows a one-line notice under the messages until the next one.
    pub fn set_notice(&mut self, notice: impl Into<String>) {
        self.notice = Some(notice.into());
    }

    /// Clears the notice line.
    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    /// Key of the message shown as number `number` (1-based).
    #[must_use]
    pub fn key_at(&self, number: usize) -> Option<&str> {
        let index = number.checked_sub(1)?;
        self.messages.get(index).map(|entry| entry.key.as_str())
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    /// Renders the screen as text lines, top to bottom.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.messages.len() + 5);
        lines.push(format!(
            "{} \u{2194} {} ({})",
            self.user, self.recipient, self.presence
        ));
        lines.push(String::new());

        for (i, entry) in self.messages.iter().enumerate() {
            let msg = &entry.message;
            let mut line = format!("[{}] {} {}: {}", i + 1, msg.timestamp, msg.author, msg.content);
            if msg.edited {
                line.push_str(" (edited)");
            }
            if msg.author == self.user && msg.read {
                match msg.read_timestamp {
                    Some(at) => line.push_str(&format!(" \u{2713}\u{2713} read {at}")),
                    None => line.push_str(" \u{2713}\u{2713} read"),
                }
            }
            lines.push(line);
        }

        lines.push(String::new());
        if self.recipient_typing.is_typing() {
            lines.push(format!("{} typing\u{2026}", self.recipient));
        }
        if let Some(notice) = &self.notice {
            lines.push(notice.clone());
        }
        let prompt = if self.editing { "edit> " } else { "> " };
        lines.push(format!("{prompt}{}", self.draft));
        lines
    }
}
