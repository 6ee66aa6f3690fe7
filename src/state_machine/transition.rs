//! Pure state transition function

use super::{Effect, Event, FailureCause, SessionContext, SessionState, ERROR_MESSAGE};
use crate::buffer::ReconstructionBuffer;
use crate::protocol::{Frame, Sender};
use crate::transcript::Message;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("A request is already in flight")]
    Busy,
    #[error("Message is empty")]
    EmptyInput,
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Pure transition function
///
/// Given the same inputs it always produces the same outputs and performs
/// no I/O. Rejected events leave the state untouched.
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Submission
        // ============================================================

        (SessionState::Idle, Event::Submit { text }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::EmptyInput);
            }
            Ok(TransitionResult::new(SessionState::Connecting {
                question: text.clone(),
            })
            .with_effect(Effect::user_message(text))
            .with_effect(Effect::ClearDraft)
            .with_effect(Effect::OpenChannel))
        }

        (SessionState::Connecting { .. } | SessionState::Streaming { .. }, Event::Submit { .. }) => {
            Err(TransitionError::Busy)
        }

        // ============================================================
        // Channel lifecycle
        // ============================================================

        (SessionState::Connecting { question }, Event::ChannelOpened) => {
            Ok(TransitionResult::new(SessionState::Streaming {
                question: question.clone(),
                reply_open: false,
                buffer: ReconstructionBuffer::new(),
            })
            .with_effect(Effect::SendRequest {
                question: question.clone(),
            }))
        }

        // ============================================================
        // Frames
        // ============================================================

        (
            SessionState::Streaming {
                question,
                reply_open,
                buffer,
            },
            Event::FrameReceived(frame),
        ) => {
            streaming_frame(question, *reply_open, buffer, context, frame)
        }

        // ============================================================
        // Failures
        // ============================================================

        (SessionState::Connecting { .. } | SessionState::Streaming { .. }, event) => {
            match event.failure_cause() {
                Some(cause) => Ok(error_path(cause)),
                None => Err(TransitionError::InvalidTransition(format!(
                    "{event:?} while a request is in flight"
                ))),
            }
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {}",
            state.name()
        ))),
    }
}

fn streaming_frame(
    question: &str,
    reply_open: bool,
    buffer: &ReconstructionBuffer,
    context: &SessionContext,
    frame: Frame,
) -> Result<TransitionResult, TransitionError> {
    let mut buffer = buffer.clone();
    let streaming = |reply_open, buffer| SessionState::Streaming {
        question: question.to_string(),
        reply_open,
        buffer,
    };

    match frame {
        // A repeated start reuses the in-progress message
        Frame::Start if reply_open => {
            buffer.reset();
            Ok(TransitionResult::new(streaming(true, buffer)).with_effect(Effect::publish("")))
        }
        Frame::Start => {
            buffer.reset();
            Ok(TransitionResult::new(streaming(true, buffer)).with_effect(Effect::BeginReply))
        }

        Frame::Stream {
            sender: Sender::Other(_),
            ..
        } => Ok(TransitionResult::new(streaming(reply_open, buffer))),

        // No reply slot yet: buffer the text, the next start discards it
        Frame::Stream {
            sender: Sender::Bot,
            text,
        } if !reply_open => {
            buffer.push(&text);
            Ok(TransitionResult::new(streaming(false, buffer)))
        }

        Frame::Stream {
            sender: Sender::Bot,
            text,
        } => {
            let publish = buffer.push(&text);
            Ok(TransitionResult::new(streaming(true, buffer))
                .with_effects(publish.map(|text| Effect::PublishReply { text })))
        }

        Frame::End => {
            let mut result = TransitionResult::new(SessionState::Idle);
            if reply_open {
                result = result
                    .with_effects(
                        buffer
                            .finish(context.flush_on_end)
                            .map(|text| Effect::PublishReply { text }),
                    )
                    .with_effect(Effect::SettleReply);
            }
            Ok(result
                .with_effect(Effect::CloseChannel)
                .with_effect(Effect::RefreshHistory))
        }

        Frame::Error { message } => Ok(error_path(FailureCause::Protocol(message))),
    }
}

/// Append the fixed notice, release the channel, return to idle
///
/// Text already published for the reply stays in the transcript.
fn error_path(cause: FailureCause) -> TransitionResult {
    TransitionResult::new(SessionState::Idle).with_effects([
        Effect::ReportFailure { cause },
        Effect::AppendMessage(Message::assistant(ERROR_MESSAGE)),
        Effect::ClearDraft,
        Effect::CloseChannel,
        Effect::RefreshHistory,
    ])
}
