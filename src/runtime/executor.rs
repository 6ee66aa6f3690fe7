//! Session runtime executor

use super::{Command, SessionSnapshot};
use crate::channel::{ChannelError, ChannelEvent, ChannelHandle, Connector, TaggedEvent};
use crate::history::{self, HistoryEntry};
use crate::protocol::{self, OutboundRequest};
use crate::state_machine::{
    transition, Effect, Event, FailureCause, SessionContext, SessionState, TransitionError,
};
use crate::transcript::Transcript;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One chat session: owns the transcript, the draft and at most one channel
pub struct SessionRuntime {
    context: SessionContext,
    state: SessionState,
    transcript: Transcript,
    draft: String,
    history: Vec<HistoryEntry>,
    last_failure: Option<FailureCause>,
    connector: Arc<dyn Connector>,
    channel: Option<ChannelHandle>,
    next_request_id: u64,
    command_rx: mpsc::Receiver<Command>,
    channel_tx: mpsc::UnboundedSender<TaggedEvent>,
    channel_rx: mpsc::UnboundedReceiver<TaggedEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    shutdown: CancellationToken,
    /// When the in-flight request times out, if a timeout is configured
    deadline: Option<Instant>,
}

impl SessionRuntime {
    pub fn new(
        context: SessionContext,
        connector: Arc<dyn Connector>,
        transcript: Transcript,
        command_rx: mpsc::Receiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        let (channel_tx, channel_rx) = mpsc::unbounded_channel();
        let history = history::project(transcript.messages());
        let mut runtime = Self {
            context,
            state: SessionState::Idle,
            transcript,
            draft: String::new(),
            history,
            last_failure: None,
            connector,
            channel: None,
            next_request_id: 0,
            command_rx,
            channel_tx,
            channel_rx,
            snapshot_tx: watch::channel(SessionSnapshot::empty()).0,
            shutdown,
            deadline: None,
        };
        runtime.publish_snapshot();
        runtime
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub async fn run(mut self) {
        tracing::info!(session_id = %self.context.session_id, "Starting session runtime");

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(tagged) = self.channel_rx.recv() => self.handle_channel_event(tagged),
                () = wait_until(self.deadline) => {
                    self.deadline = None;
                    tracing::warn!(
                        session_id = %self.context.session_id,
                        "No response from chat service before timeout"
                    );
                    let _ = self.process_event(Event::ResponseTimeout);
                }
            }
        }

        self.close_channel();
        tracing::info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Submit { text, reply } => {
                let result = self.process_event(Event::Submit { text });
                if let Err(e) = &result {
                    tracing::debug!(session_id = %self.context.session_id, error = %e, "Submit rejected");
                }
                let _ = reply.send(result);
            }
            Command::SetDraft(text) => {
                self.draft = text;
                self.publish_snapshot();
            }
        }
    }

    fn handle_channel_event(&mut self, tagged: TaggedEvent) {
        let current = self.channel.as_ref().map(ChannelHandle::request_id);
        if current != Some(tagged.request_id) {
            tracing::debug!(
                request_id = tagged.request_id,
                event = ?tagged.event,
                "Ignoring event from released channel"
            );
            return;
        }

        let event = match tagged.event {
            ChannelEvent::Opened => Event::ChannelOpened,
            ChannelEvent::Message(raw) => match protocol::decode(&raw) {
                Ok(frame) => Event::FrameReceived(frame),
                Err(e) => {
                    tracing::warn!(request_id = tagged.request_id, raw = %raw, "Rejected inbound frame");
                    Event::FrameRejected(e)
                }
            },
            ChannelEvent::Closed => Event::ChannelClosed,
            ChannelEvent::Failed(e) => Event::ChannelFailed(e),
        };

        if let Err(e) = self.process_event(event) {
            tracing::debug!(request_id = tagged.request_id, error = %e, "Channel event ignored");
        }
    }

    fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        let is_submit = matches!(event, Event::Submit { .. });
        let result = transition(&self.state, &self.context, event)?;
        if is_submit {
            self.last_failure = None;
        }

        // Effects may generate follow-up events, processed in a loop
        let mut pending = vec![result];
        while let Some(result) = pending.pop() {
            let old_state = std::mem::replace(&mut self.state, result.new_state);
            if old_state.name() != self.state.name() {
                tracing::debug!(
                    session_id = %self.context.session_id,
                    from = old_state.name(),
                    to = self.state.name(),
                    "State transition"
                );
            }

            for effect in result.effects {
                let Some(generated_event) = self.execute_effect(effect) else {
                    continue;
                };
                match transition(&self.state, &self.context, generated_event) {
                    Ok(next) => pending.push(next),
                    Err(e) => tracing::error!(error = %e, "Generated event rejected"),
                }
            }
        }

        // Any accepted event counts as activity
        self.deadline = match (self.state.is_busy(), self.context.response_timeout) {
            (true, Some(timeout)) => Some(Instant::now() + timeout),
            _ => None,
        };
        self.publish_snapshot();
        Ok(())
    }

    fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AppendMessage(message) => self.transcript.append(message),
            Effect::BeginReply => self.transcript.begin_reply(),
            Effect::PublishReply { text } => {
                if let Err(e) = self.transcript.update_last(&text) {
                    tracing::error!(session_id = %self.context.session_id, error = %e, "Publish without reply in progress");
                }
            }
            Effect::SettleReply => self.transcript.settle(),
            Effect::ClearDraft => self.draft.clear(),
            Effect::OpenChannel => self.open_channel(),
            Effect::SendRequest { question } => return self.send_request(question),
            Effect::CloseChannel => self.close_channel(),
            Effect::RefreshHistory => self.history = history::project(self.transcript.messages()),
            Effect::ReportFailure { cause } => {
                tracing::warn!(session_id = %self.context.session_id, cause = %cause, "Request failed");
                self.last_failure = Some(cause);
            }
        }
        None
    }

    fn open_channel(&mut self) {
        self.close_channel();
        self.next_request_id += 1;
        let request_id = self.next_request_id;
        tracing::info!(session_id = %self.context.session_id, request_id, "Opening channel");
        self.channel = Some(ChannelHandle::open(
            Arc::clone(&self.connector),
            request_id,
            self.channel_tx.clone(),
        ));
    }

    fn send_request(&self, question: String) -> Option<Event> {
        let request = OutboundRequest::new(question, self.history.clone());
        let Some(channel) = &self.channel else {
            return Some(Event::ChannelFailed(ChannelError::Send(
                "no open channel".to_string(),
            )));
        };
        tracing::debug!(
            request_id = channel.request_id(),
            history_len = request.history.len(),
            "Sending request"
        );
        let payload = match request.to_json() {
            Ok(payload) => payload,
            Err(e) => return Some(Event::ChannelFailed(ChannelError::Send(e.to_string()))),
        };
        channel.send(payload).err().map(Event::ChannelFailed)
    }

    fn close_channel(&mut self) {
        if let Some(channel) = self.channel.take() {
            tracing::debug!(request_id = channel.request_id(), "Closing channel");
            channel.close();
        }
    }

    fn publish_snapshot(&mut self) {
        let snapshot = SessionSnapshot {
            messages: self.transcript.snapshot(),
            busy: self.state.is_busy(),
            draft: self.draft.clone(),
            state: self.state.name(),
            reply_in_progress: self.transcript.has_reply_in_progress(),
            last_failure: self.last_failure.as_ref().map(ToString::to_string),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SessionSnapshot {
    fn empty() -> Self {
        Self {
            messages: Vec::new(),
            busy: false,
            draft: String::new(),
            state: SessionState::Idle.name(),
            reply_in_progress: false,
            last_failure: None,
        }
    }
}
