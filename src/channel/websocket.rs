//! WebSocket transport

use super::{ChannelError, Connector, Duplex};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Connects to a `ws://` chat endpoint, one connection per request
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self) -> Result<Box<dyn Duplex>, ChannelError> {
        let (stream, response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket connected");
        Ok(Box::new(WebSocketDuplex { stream }))
    }
}

struct WebSocketDuplex {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Duplex for WebSocketDuplex {
    async fn send(&mut self, payload: String) -> Result<(), ChannelError> {
        self.stream
            .send(WsMessage::Text(payload))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                // Invalid UTF-8 is replaced; the frame decoder rejects the result
                Ok(WsMessage::Binary(bytes)) => {
                    return Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(WsMessage::Close(_)) => return None,
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
                Err(e) => return Some(Err(ChannelError::Transport(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close did not complete cleanly");
        }
    }
}
