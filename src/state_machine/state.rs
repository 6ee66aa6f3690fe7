//! Session state types

use crate::buffer::ReconstructionBuffer;
use std::time::Duration;

/// Fixed notice appended to the transcript when a request fails
pub const ERROR_MESSAGE: &str = "Oops! There seems to be an error. Please try again.";

/// Lifecycle of one request/reply cycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Ready for user input, no channel open
    #[default]
    Idle,

    /// Channel requested, waiting for it to open
    Connecting { question: String },

    /// Request sent, consuming frames
    Streaming {
        question: String,
        /// Whether a `start` frame opened an assistant reply
        reply_open: bool,
        buffer: ReconstructionBuffer,
    },
}

impl SessionState {
    /// Busy while any request is in flight
    pub fn is_busy(&self) -> bool {
        !matches!(self, SessionState::Idle)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting { .. } => "connecting",
            SessionState::Streaming { .. } => "streaming",
        }
    }
}

/// Immutable per-session configuration
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    /// Publish the unterminated tail of a reply when `end` arrives
    pub flush_on_end: bool,
    /// Give up on a request after this long without channel activity
    pub response_timeout: Option<Duration>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            flush_on_end: false,
            response_timeout: None,
        }
    }

    pub fn with_flush_on_end(mut self, flush_on_end: bool) -> Self {
        self.flush_on_end = flush_on_end;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }
}
