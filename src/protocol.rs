//! Wire protocol for the streaming chat channel
//!
//! Inbound payloads are one JSON object per frame, tagged by `type`.
//! Outbound is a single request object per connection.

use crate::history::HistoryEntry;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sender value that marks assistant content in a `stream` frame
pub const BOT_SENDER: &str = "bot";

/// Who produced a `stream` fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    Bot,
    /// Any other sender; carried by the protocol but not part of the reply
    Other(String),
}

impl Sender {
    fn from_wire(value: String) -> Self {
        if value == BOT_SENDER {
            Sender::Bot
        } else {
            Sender::Other(value)
        }
    }
}

/// One typed unit of the inbound stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A new assistant reply begins
    Start,
    /// Incremental text for the current reply
    Stream { sender: Sender, text: String },
    /// The current reply is complete
    End,
    /// The request failed; nothing more will follow
    Error { message: Option<String> },
}

impl Frame {
    /// Shorthand for a bot fragment
    pub fn bot(text: impl Into<String>) -> Self {
        Frame::Stream {
            sender: Sender::Bot,
            text: text.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireFrame {
    Start,
    Stream {
        sender: String,
        // Only bot frames must carry a string; other senders may send anything
        #[serde(default)]
        message: Option<serde_json::Value>,
    },
    End,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
}

/// Parse one inbound payload into a [`Frame`]
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    let wire: WireFrame =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    Ok(match wire {
        WireFrame::Start => Frame::Start,
        WireFrame::End => Frame::End,
        WireFrame::Error { message } => Frame::Error { message },
        WireFrame::Stream { sender, message } => match (Sender::from_wire(sender), message) {
            (Sender::Bot, Some(serde_json::Value::String(text))) => Frame::bot(text),
            (Sender::Bot, _) => {
                return Err(DecodeError::Malformed(
                    "bot stream frame without a string message".to_string(),
                ))
            }
            (sender, message) => Frame::Stream {
                sender,
                text: match message {
                    Some(serde_json::Value::String(text)) => text,
                    _ => String::new(),
                },
            },
        },
    })
}

/// The request sent once the channel is open
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundRequest {
    pub question: String,
    #[serde(serialize_with = "serialize_history")]
    pub history: Vec<HistoryEntry>,
}

impl OutboundRequest {
    pub fn new(question: impl Into<String>, history: Vec<HistoryEntry>) -> Self {
        Self {
            question: question.into(),
            history,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// History goes on the wire as `[[question, answer], ...]`.
fn serialize_history<S>(history: &[HistoryEntry], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(
        history
            .iter()
            .map(|entry| [entry.question.as_str(), entry.answer.as_str()]),
    )
}
