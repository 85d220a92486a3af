//! IPC publisher
//!
//! Forwards reconciled views to a local consumer over a Unix socket as
//! length-prefixed MessagePack frames. Publishing is best-effort: a missing
//! or broken socket is logged and retried on the next publish.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{MarketDataError, Result};

/// One published view, tagged with where it came from
#[derive(Debug, Serialize)]
struct Envelope<'a, T> {
    feed: &'a str,
    symbol: &'a str,
    data: &'a T,
}

/// `u32` big-endian length followed by the MessagePack body
pub fn encode_frame<T: Serialize>(feed: &str, symbol: &str, data: &T) -> Result<Bytes> {
    let body = rmp_serde::to_vec_named(&Envelope { feed, symbol, data })
        .map_err(|e| MarketDataError::SerializationError(format!("Failed to serialize: {}", e)))?;
    let len = u32::try_from(body.len())
        .map_err(|_| MarketDataError::SerializationError("Frame too large".to_string()))?;

    let mut frame = BytesMut::with_capacity(4 + body.len());
    frame.put_u32(len);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}

/// Publisher for sending views via Unix socket
pub struct Publisher {
    socket_path: PathBuf,
    stream: Mutex<Option<UnixStream>>,
}

impl Publisher {
    pub async fn new(socket_path: impl AsRef<Path>) -> Self {
        let publisher = Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            stream: Mutex::new(None),
        };

        // The consumer may come up later
        if let Err(e) = publisher.connect().await {
            warn!(error = %e, "Initial IPC connection failed, will retry on publish");
        }

        publisher
    }

    async fn connect(&self) -> Result<()> {
        let stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            MarketDataError::IpcError(format!(
                "Failed to connect to {}: {}",
                self.socket_path.display(),
                e
            ))
        })?;

        *self.stream.lock().await = Some(stream);
        info!(path = %self.socket_path.display(), "Connected to IPC socket");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    /// Publish one view; socket failures are logged, only encoding errors are returned
    pub async fn publish<T: Serialize>(&self, feed: &str, symbol: &str, data: &T) -> Result<()> {
        let frame = encode_frame(feed, symbol, data)?;

        if self.stream.lock().await.is_none() {
            if let Err(e) = self.connect().await {
                debug!(error = %e, "IPC socket unavailable, dropping frame");
                return Ok(());
            }
        }

        let mut guard = self.stream.lock().await;
        if let Some(stream) = guard.as_mut() {
            match stream.write_all(&frame).await {
                Ok(()) => debug!(feed, symbol, bytes = frame.len(), "Published view"),
                Err(e) => {
                    warn!(error = %e, "Failed to write to IPC socket");
                    *guard = None;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tokio::io::AsyncReadExt;
    use tokio::net::UnixListener;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Received {
        feed: String,
        symbol: String,
        data: Vec<u32>,
    }

    async fn read_frame(stream: &mut UnixStream) -> Received {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        rmp_serde::from_slice(&body).unwrap()
    }

    #[test]
    fn test_frame_is_length_prefixed() {
        let frame = encode_frame("trades", "BTCUSDT", &vec![1u32, 2]).unwrap();
        let len = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(len, frame.len() - 4);

        let decoded: Received = rmp_serde::from_slice(&frame[4..]).unwrap();
        assert_eq!(decoded.feed, "trades");
        assert_eq!(decoded.data, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_publishes_to_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("views.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let publisher = Publisher::new(&path).await;
        let (mut server, _) = listener.accept().await.unwrap();
        assert!(publisher.is_connected().await);

        publisher.publish("candles", "ETHUSDT", &vec![7u32]).await.unwrap();
        publisher.publish("candles", "ETHUSDT", &vec![8u32, 9]).await.unwrap();

        assert_eq!(
            read_frame(&mut server).await,
            Received {
                feed: "candles".to_string(),
                symbol: "ETHUSDT".to_string(),
                data: vec![7],
            }
        );
        assert_eq!(read_frame(&mut server).await.data, vec![8, 9]);
    }

    #[tokio::test]
    async fn test_missing_socket_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = Publisher::new(dir.path().join("absent.sock")).await;

        assert!(!publisher.is_connected().await);
        publisher.publish("orderbook", "BTCUSDT", &vec![1u32]).await.unwrap();
        assert!(!publisher.is_connected().await);
    }
}
