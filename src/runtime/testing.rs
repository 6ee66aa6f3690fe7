//! Mock implementations for testing
//!
//! These mocks enable session testing without real I/O.

use super::{spawn, SessionHandle, SessionSnapshot};
use crate::channel::{ChannelError, Connector, Duplex};
use crate::state_machine::SessionContext;
use crate::transcript::{Transcript, DEFAULT_GREETING};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock Connector
// ============================================================================

enum Inbound {
    Payload(String),
    Fail(ChannelError),
    HangUp,
}

enum Script {
    Accept(MockDuplex),
    Refuse(ChannelError),
}

/// Connector that hands out queued connections in order
pub struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    connects: Mutex<usize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            connects: Mutex::new(0),
        }
    }

    /// Queue a connection that will open; the returned peer drives it
    pub fn accept(&self) -> MockPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_notify = Arc::new(Notify::new());
        let closed = CancellationToken::new();

        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Accept(MockDuplex {
                inbound_rx,
                sent: sent.clone(),
                sent_notify: sent_notify.clone(),
                closed: closed.clone(),
            }));

        MockPeer {
            inbound_tx,
            sent,
            sent_notify,
            closed,
        }
    }

    /// Queue a connection attempt that fails
    pub fn refuse(&self, error: ChannelError) {
        self.scripts.lock().unwrap().push_back(Script::Refuse(error));
    }

    pub fn connect_count(&self) -> usize {
        *self.connects.lock().unwrap()
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self) -> Result<Box<dyn Duplex>, ChannelError> {
        *self.connects.lock().unwrap() += 1;
        let script = self.scripts.lock().unwrap().pop_front();
        match script {
            Some(Script::Accept(duplex)) => Ok(Box::new(duplex)),
            Some(Script::Refuse(error)) => Err(error),
            None => Err(ChannelError::Connect("no mock connection queued".to_string())),
        }
    }
}

struct MockDuplex {
    inbound_rx: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<Mutex<Vec<String>>>,
    sent_notify: Arc<Notify>,
    closed: CancellationToken,
}

#[async_trait]
impl Duplex for MockDuplex {
    async fn send(&mut self, payload: String) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push(payload);
        self.sent_notify.notify_one();
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        match self.inbound_rx.recv().await {
            Some(Inbound::Payload(raw)) => Some(Ok(raw)),
            Some(Inbound::Fail(error)) => Some(Err(error)),
            Some(Inbound::HangUp) | None => None,
        }
    }

    async fn close(&mut self) {
        self.closed.cancel();
    }
}

/// The service side of a mock connection
pub struct MockPeer {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    sent: Arc<Mutex<Vec<String>>>,
    sent_notify: Arc<Notify>,
    closed: CancellationToken,
}

impl MockPeer {
    /// Deliver a raw payload to the client
    pub fn push(&self, raw: &str) {
        let _ = self.inbound_tx.send(Inbound::Payload(raw.to_string()));
    }

    pub fn push_all(&self, raws: &[&str]) {
        for raw in raws {
            self.push(raw);
        }
    }

    pub fn fail(&self, error: ChannelError) {
        let _ = self.inbound_tx.send(Inbound::Fail(error));
    }

    /// Close the connection from the service side
    pub fn hang_up(&self) {
        let _ = self.inbound_tx.send(Inbound::HangUp);
    }

    /// Payloads the client has sent so far
    pub fn received(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Wait for the client's request and parse it
    pub async fn request(&self) -> serde_json::Value {
        loop {
            if let Some(first) = self.sent.lock().unwrap().first().cloned() {
                return serde_json::from_str(&first).unwrap();
            }
            self.sent_notify.notified().await;
        }
    }

    pub async fn wait_closed(&self) {
        self.closed.cancelled().await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

// ============================================================================
// In-process WebSocket chat server
// ============================================================================

/// Serve `/chat` on a free port: each connection reads one request, replies
/// with `frames`, then closes. Requests are forwarded to the returned receiver.
pub async fn spawn_chat_server(frames: Vec<String>) -> (String, mpsc::UnboundedReceiver<String>) {
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::routing::get;
    use axum::Router;

    async fn serve(mut socket: WebSocket, frames: Vec<String>, requests: mpsc::UnboundedSender<String>) {
        if let Some(Ok(Message::Text(request))) = socket.recv().await {
            let _ = requests.send(request);
            for frame in frames {
                if socket.send(Message::Text(frame)).await.is_err() {
                    return;
                }
            }
        }
        let _ = socket.send(Message::Close(None)).await;
    }

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (request_tx, request_rx) = mpsc::unbounded_channel();

    let app = Router::new().route(
        "/chat",
        get(move |ws: WebSocketUpgrade| {
            let frames = frames.clone();
            let request_tx = request_tx.clone();
            async move { ws.on_upgrade(move |socket| serve(socket, frames, request_tx)) }
        }),
    );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/chat"), request_rx)
}

// ============================================================================
// Test Session Builder
// ============================================================================

/// A running session wired to a [`MockConnector`]
pub struct TestSession {
    pub handle: SessionHandle,
    pub connector: Arc<MockConnector>,
    pub task: JoinHandle<()>,
}

pub struct TestSessionBuilder {
    context: SessionContext,
    transcript: Transcript,
    connector: Arc<MockConnector>,
}

impl TestSession {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> TestSessionBuilder {
        TestSessionBuilder {
            context: SessionContext::new("test-session"),
            transcript: Transcript::with_greeting(DEFAULT_GREETING),
            connector: Arc::new(MockConnector::new()),
        }
    }

    /// Wait until a snapshot satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> SessionSnapshot {
        let mut rx = self.handle.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(predicate))
            .await
            .expect("timed out waiting for session snapshot")
            .expect("session stopped");
        (*snapshot).clone()
    }

    pub async fn wait_idle(&self) -> SessionSnapshot {
        self.wait_for(|s| !s.busy).await
    }

    /// Text of the last message in the latest snapshot
    pub fn last_text(&self) -> String {
        self.handle
            .snapshot()
            .messages
            .last()
            .map(|m| m.text.clone())
            .unwrap_or_default()
    }
}

impl TestSessionBuilder {
    pub fn context(mut self, context: SessionContext) -> Self {
        self.context = context;
        self
    }

    pub fn transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn build(self) -> TestSession {
        let (handle, task) = spawn(self.context, self.connector.clone(), self.transcript);
        TestSession {
            handle,
            connector: self.connector,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::WebSocketConnector;
    use crate::runtime::SessionError;
    use crate::state_machine::{TransitionError, ERROR_MESSAGE};
    use crate::transcript::{Message, Role};
    use serde_json::json;

    const START: &str = r#"{"type":"start"}"#;
    const END: &str = r#"{"type":"end"}"#;
    const ERROR: &str = r#"{"type":"error"}"#;

    fn bot(text: &str) -> String {
        json!({ "type": "stream", "sender": "bot", "message": text }).to_string()
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let session = TestSession::new().build();
        let snapshot = session.handle.snapshot();

        assert_eq!(snapshot.messages, vec![Message::assistant(DEFAULT_GREETING)]);
        assert!(!snapshot.busy);
        assert_eq!(snapshot.state, "idle");
    }

    #[tokio::test]
    async fn test_simple_streamed_reply() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();

        session.handle.set_draft("Hi").await.unwrap();
        session.handle.submit("Hi").await.unwrap();

        let snapshot = session.handle.snapshot();
        assert!(snapshot.busy);
        assert!(snapshot.draft.is_empty());
        assert_eq!(snapshot.messages.last(), Some(&Message::user("Hi")));

        assert_eq!(peer.request().await, json!({ "question": "Hi", "history": [] }));

        peer.push(START);
        peer.push(&bot("Hel"));
        peer.push(&bot("lo."));
        session.wait_for(|s| s.messages.last().is_some_and(|m| m.text == "Hello.")).await;

        peer.push(END);
        let snapshot = session.wait_idle().await;

        assert_eq!(
            snapshot.messages,
            vec![
                Message::assistant(DEFAULT_GREETING),
                Message::user("Hi"),
                Message::assistant("Hello."),
            ]
        );
        assert!(!snapshot.reply_in_progress);
        peer.wait_closed().await;
    }

    #[tokio::test]
    async fn test_partial_text_waits_for_boundary() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        peer.request().await;

        peer.push(START);
        peer.push(&bot("Hel"));
        // A user-sender frame in between must not disturb anything
        peer.push(r#"{"type":"stream","sender":"user","message":"noise."}"#);
        peer.push(&bot("lo"));
        peer.push(&bot(" world"));

        let snapshot = session
            .wait_for(|s| s.reply_in_progress && s.messages.last().is_some_and(|m| !m.text.is_empty()))
            .await;
        assert_eq!(snapshot.messages.last().unwrap().text, "Hello world");
        assert_eq!(snapshot.messages.len(), 3);
    }

    #[tokio::test]
    async fn test_submit_rejected_while_busy_and_when_blank() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();

        assert!(matches!(
            session.handle.submit("   ").await,
            Err(SessionError::Rejected(TransitionError::EmptyInput))
        ));

        session.handle.submit("First").await.unwrap();
        peer.request().await;
        assert!(matches!(
            session.handle.submit("Second").await,
            Err(SessionError::Rejected(TransitionError::Busy))
        ));

        let users: Vec<_> = session
            .handle
            .snapshot()
            .messages
            .into_iter()
            .filter(|m| m.role == Role::User)
            .collect();
        assert_eq!(users, vec![Message::user("First")]);
        assert_eq!(session.connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_history_carried_into_next_request() {
        let session = TestSession::new().build();

        let first = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        assert_eq!(first.request().await["history"], json!([]));
        first.push_all(&[START, &bot("Hello"), &bot(" "), END]);
        session.wait_idle().await;
        assert_eq!(session.last_text(), "Hello ");

        let second = session.connector.accept();
        session.handle.submit("How are you?").await.unwrap();
        assert_eq!(
            second.request().await,
            json!({ "question": "How are you?", "history": [["Hi", "Hello "]] })
        );
    }

    #[tokio::test]
    async fn test_error_frame_appends_notice() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        peer.request().await;

        peer.push_all(&[START, ERROR]);
        let snapshot = session.wait_idle().await;

        assert_eq!(snapshot.messages.last(), Some(&Message::assistant(ERROR_MESSAGE)));
        // The empty reply opened by `start` stays in place
        assert_eq!(snapshot.messages.len(), 4);
        assert_eq!(snapshot.last_failure.as_deref(), Some("service error"));
        peer.wait_closed().await;

        // A new submit is accepted after the failure
        let _retry = session.connector.accept();
        session.handle.submit("Retry").await.unwrap();
        assert!(session.handle.snapshot().last_failure.is_none());
    }

    #[tokio::test]
    async fn test_structured_frame_from_other_sender_is_ignored() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        peer.request().await;

        let progress =
            json!({ "type": "stream", "sender": "system", "message": { "progress": 0.5 } })
                .to_string();
        peer.push_all(&[START, &progress, &bot("Hello."), END]);
        let snapshot = session.wait_idle().await;

        assert_eq!(snapshot.messages.last(), Some(&Message::assistant("Hello.")));
        assert!(snapshot.last_failure.is_none());
    }

    #[tokio::test]
    async fn test_fragment_before_start_does_not_fail_reply() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        peer.request().await;

        peer.push_all(&[&bot("Hm. "), START, &bot("Hello."), END]);
        let snapshot = session.wait_idle().await;

        assert_eq!(
            snapshot.messages,
            vec![
                Message::assistant(DEFAULT_GREETING),
                Message::user("Hi"),
                Message::assistant("Hello."),
            ]
        );
        assert!(snapshot.last_failure.is_none());
    }

    #[tokio::test]
    async fn test_published_text_survives_failure() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        peer.request().await;

        peer.push_all(&[START, &bot("Partial answer. "), "{not json"]);
        let snapshot = session.wait_idle().await;

        let texts: Vec<_> = snapshot.messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts[2..], ["Partial answer. ", ERROR_MESSAGE]);
    }

    #[tokio::test]
    async fn test_connect_failure_and_early_close() {
        let session = TestSession::new().build();

        session
            .connector
            .refuse(ChannelError::Connect("refused".to_string()));
        session.handle.submit("Hi").await.unwrap();
        let snapshot = session.wait_idle().await;
        assert_eq!(snapshot.messages.last(), Some(&Message::assistant(ERROR_MESSAGE)));

        let peer = session.connector.accept();
        session.handle.submit("Again").await.unwrap();
        peer.request().await;
        peer.push(START);
        peer.hang_up();
        let snapshot = session.wait_idle().await;
        assert_eq!(snapshot.messages.last(), Some(&Message::assistant(ERROR_MESSAGE)));
        assert_eq!(
            snapshot.last_failure.as_deref(),
            Some("channel closed before reply ended")
        );
    }

    #[tokio::test]
    async fn test_response_timeout() {
        let context = SessionContext::new("test-session")
            .with_response_timeout(Some(Duration::from_millis(100)));
        let session = TestSession::new().context(context).build();
        let peer = session.connector.accept();

        session.handle.submit("Hi").await.unwrap();
        peer.request().await;
        peer.push(START);

        let snapshot = session.wait_idle().await;
        assert_eq!(snapshot.messages.last(), Some(&Message::assistant(ERROR_MESSAGE)));
        assert_eq!(snapshot.last_failure.as_deref(), Some("response timed out"));
    }

    #[tokio::test]
    async fn test_shutdown_releases_channel() {
        let session = TestSession::new().build();
        let peer = session.connector.accept();
        session.handle.submit("Hi").await.unwrap();
        peer.request().await;

        session.handle.shutdown();
        session.task.await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), peer.wait_closed())
            .await
            .expect("channel was not released");
        assert!(peer.is_closed());
        assert!(matches!(
            session.handle.submit("After").await,
            Err(SessionError::Stopped)
        ));
    }

    #[tokio::test]
    async fn test_end_to_end_over_websocket() {
        let (url, mut requests) = spawn_chat_server(vec![
            START.to_string(),
            bot("Hel"),
            bot("lo."),
            END.to_string(),
        ])
        .await;

        let (handle, _task) = spawn(
            SessionContext::new("ws-session"),
            Arc::new(WebSocketConnector::new(url)),
            Transcript::with_greeting(DEFAULT_GREETING),
        );

        handle.submit("Hi").await.unwrap();
        let snapshot = tokio::time::timeout(Duration::from_secs(5), handle.wait_idle())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(snapshot.messages.last(), Some(&Message::assistant("Hello.")));
        let request: serde_json::Value =
            serde_json::from_str(&requests.recv().await.unwrap()).unwrap();
        assert_eq!(request, json!({ "question": "Hi", "history": [] }));
    }
}
