//! Effects produced by state transitions

use super::FailureCause;
use crate::transcript::Message;

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Append a settled message to the transcript
    AppendMessage(Message),

    /// Append the empty assistant message a reply streams into
    BeginReply,

    /// Replace the text of the in-progress reply
    PublishReply { text: String },

    /// Freeze the in-progress reply
    SettleReply,

    /// Clear the pending input value
    ClearDraft,

    /// Open a new channel for this request
    OpenChannel,

    /// Send the request over the open channel
    SendRequest { question: String },

    /// Close and release the channel
    CloseChannel,

    /// Recompute the projected history from the transcript
    RefreshHistory,

    /// Record why the request failed
    ReportFailure { cause: FailureCause },
}

impl Effect {
    pub fn user_message(text: impl Into<String>) -> Self {
        Effect::AppendMessage(Message::user(text))
    }

    pub fn publish(text: impl Into<String>) -> Self {
        Effect::PublishReply { text: text.into() }
    }
}
