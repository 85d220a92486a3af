//! Stand-in stream connectors for tests

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::{MarketDataError, Result};
use crate::websocket::{Incoming, StreamConnection, StreamConnector};

/// Every connect fails
#[derive(Default)]
pub struct RefusingConnector {
    pub attempts: AtomicU32,
}

#[async_trait]
impl StreamConnector for RefusingConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn StreamConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(MarketDataError::WebSocketConnection("refused".to_string()))
    }
}

/// One connection whose frames the test pushes by hand
pub struct ChannelConnector {
    frames: Mutex<Option<mpsc::UnboundedReceiver<Incoming>>>,
    pub attempts: AtomicU32,
    pub urls: Mutex<Vec<String>>,
}

impl ChannelConnector {
    pub fn new() -> (Self, mpsc::UnboundedSender<Incoming>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            frames: Mutex::new(Some(rx)),
            attempts: AtomicU32::new(0),
            urls: Mutex::new(Vec::new()),
        };
        (connector, tx)
    }
}

#[async_trait]
impl StreamConnector for ChannelConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        match self.frames.lock().unwrap().take() {
            Some(frames) => Ok(Box::new(ChannelConnection { frames })),
            None => Err(MarketDataError::WebSocketConnection("already used".to_string())),
        }
    }
}

struct ChannelConnection {
    frames: mpsc::UnboundedReceiver<Incoming>,
}

#[async_trait]
impl StreamConnection for ChannelConnection {
    async fn recv(&mut self) -> Result<Incoming> {
        Ok(self.frames.recv().await.unwrap_or(Incoming::Closed))
    }

    async fn ping(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) {}
}
