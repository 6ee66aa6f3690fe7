//! Runtime for executing a chat session
//!
//! A session runs on its own task. Callers talk to it through a
//! [`SessionHandle`] and observe it through [`SessionSnapshot`]s.

mod executor;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;

use crate::channel::Connector;
use crate::state_machine::{SessionContext, TransitionError};
use crate::transcript::{Message, Transcript};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 32;

/// Requests from the input side
#[derive(Debug)]
pub enum Command {
    Submit {
        text: String,
        reply: oneshot::Sender<Result<(), TransitionError>>,
    },
    SetDraft(String),
}

/// Read-only view of the session published after every change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub busy: bool,
    pub draft: String,
    pub state: &'static str,
    pub reply_in_progress: bool,
    /// Cause of the most recent failed request, cleared by the next submit
    pub last_failure: Option<String>,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Rejected(#[from] TransitionError),
    #[error("session has stopped")]
    Stopped,
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<Command>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    /// Submit user text; rejected while busy or when blank
    ///
    /// Returns once the request has been started, not when the reply ends.
    pub async fn submit(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let (reply, result) = oneshot::channel();
        self.command_tx
            .send(Command::Submit {
                text: text.into(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Stopped)?;
        result.await.map_err(|_| SessionError::Stopped)??;
        Ok(())
    }

    pub async fn set_draft(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.command_tx
            .send(Command::SetDraft(text.into()))
            .await
            .map_err(|_| SessionError::Stopped)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.snapshot_rx.borrow().busy
    }

    /// Wait until no request is in flight
    pub async fn wait_idle(&self) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.subscribe();
        let snapshot = rx
            .wait_for(|snapshot| !snapshot.busy)
            .await
            .map_err(|_| SessionError::Stopped)?;
        Ok((*snapshot).clone())
    }

    /// Stop the session, closing any open channel
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Start a session task
pub fn spawn(
    context: SessionContext,
    connector: Arc<dyn Connector>,
    transcript: Transcript,
) -> (SessionHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let shutdown = CancellationToken::new();

    let runtime = SessionRuntime::new(context, connector, transcript, command_rx, shutdown.clone());
    let snapshot_rx = runtime.subscribe();
    let task = tokio::spawn(runtime.run());

    (
        SessionHandle {
            command_tx,
            snapshot_rx,
            shutdown,
        },
        task,
    )
}
