//! WebSocket client for exchange push streams
//!
//! Handles connection and message reception for a single stream URL.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::subscriber::{StreamConnection, StreamConnector};
use crate::error::{MarketDataError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One frame as the subscriber sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Ping, pong or raw frame; nothing to forward
    Control,
    /// Remote closed or the stream ended
    Closed,
}

/// WebSocket client for a single connection
pub struct WebSocketClient {
    stream: Option<WsStream>,
    url: String,
}

impl WebSocketClient {
    /// Create a new WebSocket client
    pub fn new(url: &str) -> Self {
        Self {
            stream: None,
            url: url.to_string(),
        }
    }

    /// Connect to the WebSocket endpoint
    pub async fn connect(&mut self) -> Result<()> {
        info!(url = %self.url, "Connecting to WebSocket");

        let (ws_stream, response) = connect_async(&self.url).await.map_err(|e| {
            MarketDataError::WebSocketConnection(format!("Failed to connect: {}", e))
        })?;

        info!(status = ?response.status(), "WebSocket connected");
        self.stream = Some(ws_stream);

        Ok(())
    }

    /// Receive the next frame
    pub async fn recv(&mut self) -> Result<Incoming> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MarketDataError::WebSocketConnection("Not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(len = text.len(), "Received text message");
                Ok(Incoming::Text(text))
            }
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8_lossy(&data).to_string();
                Ok(Incoming::Text(text))
            }
            Some(Ok(Message::Ping(data))) => {
                debug!("Received ping, sending pong");
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(Incoming::Control)
            }
            Some(Ok(Message::Pong(_))) => {
                debug!("Received pong");
                Ok(Incoming::Control)
            }
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "Received close frame");
                self.stream = None;
                Ok(Incoming::Closed)
            }
            Some(Ok(Message::Frame(_))) => Ok(Incoming::Control),
            Some(Err(e)) => {
                error!(error = %e, "WebSocket error");
                self.stream = None;
                Err(MarketDataError::WebSocketMessage(e.to_string()))
            }
            None => {
                warn!("WebSocket stream ended");
                self.stream = None;
                Ok(Incoming::Closed)
            }
        }
    }

    /// Send a ping to keep connection alive
    pub async fn ping(&mut self) -> Result<()> {
        match self.stream.as_mut() {
            Some(stream) => stream
                .send(Message::Ping(vec![]))
                .await
                .map_err(|e| MarketDataError::WebSocketMessage(e.to_string())),
            None => Err(MarketDataError::WebSocketConnection("Not connected".to_string())),
        }
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the connection
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

#[async_trait]
impl StreamConnection for WebSocketClient {
    async fn recv(&mut self) -> Result<Incoming> {
        WebSocketClient::recv(self).await
    }

    async fn ping(&mut self) -> Result<()> {
        WebSocketClient::ping(self).await
    }

    async fn close(&mut self) {
        WebSocketClient::close(self).await
    }
}

/// Opens real tungstenite connections
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl StreamConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>> {
        let mut client = WebSocketClient::new(url);
        client.connect().await?;
        Ok(Box::new(client))
    }
}
