//! Events that drive the session

use crate::channel::ChannelError;
use crate::protocol::{DecodeError, Frame};
use std::fmt;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    Submit { text: String },

    // Channel events
    ChannelOpened,
    FrameReceived(Frame),
    FrameRejected(DecodeError),
    ChannelFailed(ChannelError),
    ChannelClosed,

    // Timer events
    ResponseTimeout,
}

impl Event {
    /// The failure this event represents, if it leads to the error path
    pub fn failure_cause(&self) -> Option<FailureCause> {
        match self {
            Event::FrameReceived(Frame::Error { message }) => {
                Some(FailureCause::Protocol(message.clone()))
            }
            Event::FrameRejected(e) => Some(FailureCause::Decode(e.clone())),
            Event::ChannelFailed(e) => Some(FailureCause::Channel(e.clone())),
            Event::ChannelClosed => Some(FailureCause::ClosedEarly),
            Event::ResponseTimeout => Some(FailureCause::Timeout),
            _ => None,
        }
    }
}

/// Why a request ended on the error path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// Explicit `error` frame from the service
    Protocol(Option<String>),
    Decode(DecodeError),
    Channel(ChannelError),
    /// Channel closed before the reply ended
    ClosedEarly,
    Timeout,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureCause::Protocol(Some(message)) => write!(f, "service error: {message}"),
            FailureCause::Protocol(None) => f.write_str("service error"),
            FailureCause::Decode(e) => write!(f, "{e}"),
            FailureCause::Channel(e) => write!(f, "{e}"),
            FailureCause::ClosedEarly => f.write_str("channel closed before reply ended"),
            FailureCause::Timeout => f.write_str("response timed out"),
        }
    }
}
