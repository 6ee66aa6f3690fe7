//! Duplex channel adapter
//!
//! One short-lived connection per request. The adapter runs the connection
//! on its own task and reports what happens as [`ChannelEvent`]s, tagged
//! with the request they belong to.

mod websocket;

pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("send failed: {0}")]
    Send(String),
}

/// An open bidirectional text channel
#[async_trait]
pub trait Duplex: Send {
    async fn send(&mut self, payload: String) -> Result<(), ChannelError>;

    /// Next inbound payload, or `None` once the peer has closed
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

/// Opens channels to the chat service
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Duplex>, ChannelError>;
}

#[async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    async fn connect(&self) -> Result<Box<dyn Duplex>, ChannelError> {
        (**self).connect().await
    }
}

/// Lifecycle and data events surfaced by an open channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Message(String),
    Closed,
    Failed(ChannelError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedEvent {
    pub request_id: u64,
    pub event: ChannelEvent,
}

/// Owner of one request's connection
///
/// Dropping the handle cancels the channel task, which closes the
/// connection if it was established.
pub struct ChannelHandle {
    request_id: u64,
    outbound_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl ChannelHandle {
    /// Spawn the channel task and start connecting
    pub fn open(
        connector: Arc<dyn Connector>,
        request_id: u64,
        events: mpsc::UnboundedSender<TaggedEvent>,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_channel(
            connector,
            request_id,
            events,
            outbound_rx,
            cancel.clone(),
        ));

        Self {
            request_id,
            outbound_tx,
            cancel,
        }
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// Queue a payload; only valid after [`ChannelEvent::Opened`]
    pub fn send(&self, payload: String) -> Result<(), ChannelError> {
        self.outbound_tx
            .send(payload)
            .map_err(|_| ChannelError::Send("channel task has stopped".to_string()))
    }

    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_channel(
    connector: Arc<dyn Connector>,
    request_id: u64,
    events: mpsc::UnboundedSender<TaggedEvent>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    // The receiver going away just means nobody cares about this request anymore
    let emit = |event| {
        let _ = events.send(TaggedEvent { request_id, event });
    };

    let mut conn = tokio::select! {
        () = cancel.cancelled() => return,
        result = connector.connect() => match result {
            Ok(conn) => conn,
            Err(e) => {
                tracing::debug!(request_id, error = %e, "Channel connect failed");
                emit(ChannelEvent::Failed(e));
                return;
            }
        },
    };

    tracing::debug!(request_id, "Channel opened");
    emit(ChannelEvent::Opened);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            Some(payload) = outbound_rx.recv() => {
                if let Err(e) = conn.send(payload).await {
                    emit(ChannelEvent::Failed(e));
                    break;
                }
            }
            inbound = conn.recv() => match inbound {
                Some(Ok(raw)) => emit(ChannelEvent::Message(raw)),
                Some(Err(e)) => {
                    emit(ChannelEvent::Failed(e));
                    break;
                }
                None => {
                    emit(ChannelEvent::Closed);
                    break;
                }
            },
        }
    }

    conn.close().await;
    tracing::debug!(request_id, "Channel released");
}
