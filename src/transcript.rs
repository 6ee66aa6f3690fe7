//! Transcript of user and assistant messages
//!
//! Append-only, except that the trailing assistant message may grow in
//! place while its reply is streaming. At most one message is in progress
//! and it is always the last one.

use serde::Serialize;
use thiserror::Error;

/// Default opening message of a fresh session
pub const DEFAULT_GREETING: &str = "Hi there! How can I help?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub text: String,
    pub role: Role,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::User,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            role: Role::Assistant,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    #[error("invalid transcript state: {0}")]
    InvalidState(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Whether the last message is an assistant reply still streaming
    reply_open: bool,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_greeting(greeting: impl Into<String>) -> Self {
        let mut transcript = Self::new();
        transcript.append(Message::assistant(greeting));
        transcript
    }

    /// Append a settled message, settling any reply still in progress
    pub fn append(&mut self, message: Message) {
        self.reply_open = false;
        self.messages.push(message);
    }

    /// Append an empty assistant message that will be filled while streaming
    pub fn begin_reply(&mut self) {
        self.append(Message::assistant(String::new()));
        self.reply_open = true;
    }

    /// Replace the text of the in-progress reply
    pub fn update_last(&mut self, text: &str) -> Result<(), TranscriptError> {
        if !self.reply_open {
            return Err(TranscriptError::InvalidState(
                "no assistant reply in progress",
            ));
        }
        let last = self
            .messages
            .last_mut()
            .ok_or(TranscriptError::InvalidState("transcript is empty"))?;
        if last.text != text {
            text.clone_into(&mut last.text);
        }
        Ok(())
    }

    /// Freeze the in-progress reply, if any
    pub fn settle(&mut self) {
        self.reply_open = false;
    }

    pub fn has_reply_in_progress(&self) -> bool {
        self.reply_open
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Owned copy for readers outside the session task
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.clone()
    }
}
