//! Stream subscriber
//!
//! Owns one push connection per (symbol, channel), reconnecting with linear
//! back-off until the attempt budget is spent. Everything it observes is
//! forwarded to the owning feed as [`StreamEvent`]s.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::client::Incoming;
use super::state::{CloseAction, ConnectionState, ConnectionStatus};
use crate::error::{MarketDataError, Result};

/// An established push connection
#[async_trait]
pub trait StreamConnection: Send {
    async fn recv(&mut self) -> Result<Incoming>;
    async fn ping(&mut self) -> Result<()>;
    async fn close(&mut self);
}

/// Opens push connections
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn StreamConnection>>;
}

/// Push channel for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamChannel {
    /// Full top-N book snapshots
    Depth { levels: usize },
    Trade,
    Kline { interval: String },
}

impl StreamChannel {
    pub fn stream_name(&self, symbol: &str) -> String {
        let symbol = symbol.to_lowercase();
        match self {
            StreamChannel::Depth { levels } => format!("{}@depth{}@100ms", symbol, levels),
            StreamChannel::Trade => format!("{}@trade", symbol),
            StreamChannel::Kline { interval } => format!("{}@kline_{}", symbol, interval),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StreamChannel::Depth { .. } => "depth",
            StreamChannel::Trade => "trade",
            StreamChannel::Kline { .. } => "kline",
        }
    }
}

/// What a subscription reports to its feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Status(ConnectionStatus),
    Message(String),
    /// Reconnect budget spent; no further events follow
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub struct SubscriberSettings {
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Ping when the stream has been silent this long
    pub stale_timeout: Duration,
}

impl Default for SubscriberSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
            stale_timeout: Duration::from_secs(45),
        }
    }
}

/// Opens subscriptions against one stream endpoint
#[derive(Clone)]
pub struct StreamSubscriber {
    connector: Arc<dyn StreamConnector>,
    endpoint: String,
    settings: SubscriberSettings,
}

impl StreamSubscriber {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        endpoint: &str,
        settings: SubscriberSettings,
    ) -> Self {
        Self {
            connector,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            settings,
        }
    }

    pub fn url(&self, symbol: &str, channel: &StreamChannel) -> String {
        format!("{}/{}", self.endpoint, channel.stream_name(symbol))
    }

    /// Start a subscription; it lives until the handle is closed or dropped,
    /// or until `parent` is cancelled
    pub fn subscribe(
        &self,
        symbol: &str,
        channel: &StreamChannel,
        events: mpsc::Sender<StreamEvent>,
        parent: &CancellationToken,
    ) -> StreamHandle {
        let url = self.url(symbol, channel);
        let cancel = parent.child_token();

        let task = tokio::spawn(run_stream(
            self.connector.clone(),
            url,
            self.settings.clone(),
            events,
            cancel.clone(),
        ));

        StreamHandle {
            cancel,
            task: Some(task),
        }
    }
}

/// Cancellation handle for one subscription
pub struct StreamHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Stop the subscription and any pending reconnect; repeat calls do nothing
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close and wait for the connection task to wind down
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

enum PumpOutcome {
    Cancelled,
    ReceiverGone,
    Closed,
    Failed(MarketDataError),
}

async fn run_stream(
    connector: Arc<dyn StreamConnector>,
    url: String,
    settings: SubscriberSettings,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) {
    let mut state = ConnectionState::new(settings.max_attempts, settings.base_delay);

    loop {
        state.connecting();
        if events.send(StreamEvent::Status(state.status())).await.is_err() {
            break;
        }

        let connected = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connector.connect(&url) => result,
        };

        match connected {
            Ok(mut conn) => {
                state.opened();
                info!(url = %url, "Stream open");
                if events.send(StreamEvent::Status(state.status())).await.is_err() {
                    conn.close().await;
                    break;
                }

                match pump(conn.as_mut(), &events, &cancel, settings.stale_timeout).await {
                    PumpOutcome::Cancelled | PumpOutcome::ReceiverGone => {
                        conn.close().await;
                        break;
                    }
                    PumpOutcome::Closed => {
                        info!(url = %url, "Stream closed by remote");
                    }
                    PumpOutcome::Failed(e) => {
                        warn!(url = %url, error = %e, "Stream error");
                        state.errored();
                        let _ = events.send(StreamEvent::Status(state.status())).await;
                        conn.close().await;
                    }
                }
            }
            Err(e) => {
                warn!(url = %url, attempt = state.attempts(), error = %e, "Stream connect failed");
                state.errored();
                let _ = events.send(StreamEvent::Status(state.status())).await;
            }
        }

        if cancel.is_cancelled() {
            break;
        }

        match state.closed() {
            CloseAction::Reconnect { attempt, delay } => {
                warn!(
                    url = %url,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting after close"
                );
                let _ = events.send(StreamEvent::Status(state.status())).await;
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
            CloseAction::Exhausted => {
                error!(url = %url, attempts = state.attempts(), "Reconnect attempts exhausted");
                let _ = events.send(StreamEvent::Status(state.status())).await;
                let _ = events
                    .send(StreamEvent::Exhausted {
                        attempts: state.attempts(),
                    })
                    .await;
                return;
            }
            CloseAction::Stopped => break,
        }
    }

    state.unsubscribe();
    info!(url = %url, "Stream subscription stopped");
}

async fn pump(
    conn: &mut dyn StreamConnection,
    events: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
    stale_timeout: Duration,
) -> PumpOutcome {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return PumpOutcome::Cancelled,
            next = timeout(stale_timeout, conn.recv()) => next,
        };

        match next {
            Ok(Ok(Incoming::Text(text))) => {
                if events.send(StreamEvent::Message(text)).await.is_err() {
                    return PumpOutcome::ReceiverGone;
                }
            }
            Ok(Ok(Incoming::Control)) => continue,
            Ok(Ok(Incoming::Closed)) => return PumpOutcome::Closed,
            Ok(Err(e)) => return PumpOutcome::Failed(e),
            Err(_) => {
                warn!(
                    silent_secs = stale_timeout.as_secs(),
                    "No message received within timeout, sending keepalive"
                );
                if let Err(e) = conn.ping().await {
                    warn!(error = %e, "Failed to send keepalive ping");
                    return PumpOutcome::Failed(MarketDataError::ConnectionTimeout);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RefusingConnector;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    struct ScriptedConnection {
        frames: VecDeque<Result<Incoming>>,
    }

    #[async_trait]
    impl StreamConnection for ScriptedConnection {
        async fn recv(&mut self) -> Result<Incoming> {
            match self.frames.pop_front() {
                Some(frame) => frame,
                None => std::future::pending().await,
            }
        }

        async fn ping(&mut self) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    /// Hands out one scripted connection per connect call
    struct ScriptedConnector {
        scripts: Mutex<VecDeque<Vec<Result<Incoming>>>>,
        attempts: AtomicU32,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Vec<Result<Incoming>>>) -> Self {
            Self {
                scripts: Mutex::new(scripts.into()),
                attempts: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl StreamConnector for ScriptedConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn StreamConnection>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(frames) => Ok(Box::new(ScriptedConnection {
                    frames: frames.into(),
                })),
                None => Err(MarketDataError::WebSocketConnection("no script".to_string())),
            }
        }
    }

    fn subscriber(connector: Arc<dyn StreamConnector>) -> StreamSubscriber {
        StreamSubscriber::new(connector, "wss://example.test/ws/", SubscriberSettings::default())
    }

    async fn collect_until_exhausted(rx: &mut mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut seen = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, StreamEvent::Exhausted { .. });
            seen.push(event);
            if done {
                break;
            }
        }
        seen
    }

    #[test]
    fn test_stream_urls() {
        let sub = subscriber(Arc::new(RefusingConnector::default()));
        assert_eq!(
            sub.url("BTCUSDT", &StreamChannel::Depth { levels: 20 }),
            "wss://example.test/ws/btcusdt@depth20@100ms"
        );
        assert_eq!(
            sub.url("ETHUSDT", &StreamChannel::Kline {
                interval: "1h".to_string()
            }),
            "wss://example.test/ws/ethusdt@kline_1h"
        );
        assert_eq!(sub.url("BTCUSDT", &StreamChannel::Trade), "wss://example.test/ws/btcusdt@trade");
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_after_five_reconnects() {
        let connector = Arc::new(RefusingConnector::default());
        let (tx, mut rx) = mpsc::channel(64);
        let root = CancellationToken::new();
        let start = Instant::now();

        let handle = subscriber(connector.clone()).subscribe("BTCUSDT", &StreamChannel::Trade, tx, &root);
        let events = collect_until_exhausted(&mut rx).await;

        // First connect plus five reconnects
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 6);
        assert_eq!(events.last(), Some(&StreamEvent::Exhausted { attempts: 5 }));
        assert!(events.contains(&StreamEvent::Status(ConnectionStatus::Erroring)));
        // 1s + 2s + 3s + 4s + 5s of back-off
        assert!(start.elapsed() >= Duration::from_secs(15));

        // No sixth reconnect, however long we wait
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 6);
        assert!(rx.recv().await.is_none());
        drop(handle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwards_messages_and_reconnects() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![
                Ok(Incoming::Text("a".to_string())),
                Ok(Incoming::Control),
                Ok(Incoming::Text("b".to_string())),
                Ok(Incoming::Closed),
            ],
            vec![Ok(Incoming::Text("c".to_string()))],
        ]));
        let (tx, mut rx) = mpsc::channel(64);
        let root = CancellationToken::new();
        let handle = subscriber(connector.clone()).subscribe("BTCUSDT", &StreamChannel::Trade, tx, &root);

        let mut messages = Vec::new();
        let mut statuses = Vec::new();
        while messages.len() < 3 {
            match rx.recv().await {
                Some(StreamEvent::Message(text)) => messages.push(text),
                Some(StreamEvent::Status(status)) => statuses.push(status),
                other => panic!("unexpected event: {:?}", other),
            }
        }

        assert_eq!(messages, vec!["a", "b", "c"]);
        assert_eq!(
            statuses,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
            ]
        );
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_error_marks_erroring_then_reconnects() {
        let connector = Arc::new(ScriptedConnector::new(vec![
            vec![Err(MarketDataError::WebSocketMessage("reset".to_string()))],
            vec![],
        ]));
        let (tx, mut rx) = mpsc::channel(64);
        let root = CancellationToken::new();
        let handle = subscriber(connector.clone()).subscribe("BTCUSDT", &StreamChannel::Trade, tx, &root);

        let mut statuses = Vec::new();
        while statuses.len() < 6 {
            if let Some(StreamEvent::Status(status)) = rx.recv().await {
                statuses.push(status);
            }
        }

        assert_eq!(
            statuses,
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
                ConnectionStatus::Erroring,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Open,
            ]
        );
        handle.close();
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_is_idempotent_and_cancels_reconnect() {
        let connector = Arc::new(RefusingConnector::default());
        let (tx, mut rx) = mpsc::channel(64);
        let root = CancellationToken::new();
        let handle = subscriber(connector.clone()).subscribe("BTCUSDT", &StreamChannel::Trade, tx, &root);

        // First attempt fails and a reconnect is pending
        while rx.recv().await != Some(StreamEvent::Status(ConnectionStatus::Disconnected)) {}
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        handle.close();
        handle.close();
        assert!(handle.is_closed());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_subscription() {
        let connector = Arc::new(RefusingConnector::default());
        let (tx, mut rx) = mpsc::channel(64);
        let root = CancellationToken::new();
        let handle = subscriber(connector.clone()).subscribe("BTCUSDT", &StreamChannel::Trade, tx, &root);

        while rx.recv().await != Some(StreamEvent::Status(ConnectionStatus::Disconnected)) {}
        root.cancel();
        assert!(handle.is_closed());
        handle.shutdown().await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }
}
