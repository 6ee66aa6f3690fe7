//! Projected conversation history
//!
//! Only the most recent exchange is carried into the next request.

use crate::transcript::Message;

/// Minimum transcript length before a pair is projected (greeting + one exchange)
const MIN_MESSAGES_FOR_HISTORY: usize = 3;

/// A prior question/answer pair sent as context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
}

impl HistoryEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

/// Derive the history to attach to the next request
///
/// Pairs the second-to-last and last messages whenever the transcript holds
/// at least three. Roles are not inspected: after a failed request the pair
/// is the user's question and the error notice.
pub fn project(messages: &[Message]) -> Vec<HistoryEntry> {
    if messages.len() < MIN_MESSAGES_FOR_HISTORY {
        return Vec::new();
    }
    match messages {
        [.., question, answer] => vec![HistoryEntry::new(&question.text, &answer.text)],
        _ => Vec::new(),
    }
}
