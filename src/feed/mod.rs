//! Per-symbol feeds
//!
//! A feed owns everything for one (symbol, channel) pair: the support gate
//! check, the REST snapshot, the stream subscription and the throttled
//! reconciler. Its lifetime is tied to a [`FeedHandle`]; closing or dropping
//! the handle cancels the stream, any pending reconnect and any in-flight
//! fetch, and discards buffered updates.

mod kinds;
mod session;

pub use kinds::{CandlesFeed, FeedKind, OrderBookFeed, OutputOf, SnapshotOf, TradesFeed};
pub use session::{MarketSession, SessionFeeds, SymbolFeeds};

use futures_util::future::{BoxFuture, OptionFuture};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::candles::HistoryPager;
use crate::config::Config;
use crate::error::{MarketDataError, Result};
use crate::reconcile::ThrottledReconciler;
use crate::rest::{MarketDataSource, RestClient};
use crate::symbols::{SymbolSupportGate, SystemClock};
use crate::telemetry::SyncMetrics;
use crate::websocket::{
    ConnectionStatus, StreamEvent, StreamSubscriber, SubscriberSettings, TungsteniteConnector,
};

const EVENT_BUFFER: usize = 256;
const STREAM_BUFFER: usize = 1024;
const COMMAND_BUFFER: usize = 16;

/// Conditions after which a feed stops producing data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedFault {
    #[error("symbol {0} is not available on the exchange")]
    UnsupportedSymbol(String),

    #[error("stream gave up after {attempts} reconnect attempts")]
    StreamExhausted { attempts: u32 },
}

impl From<FeedFault> for MarketDataError {
    fn from(fault: FeedFault) -> Self {
        match fault {
            FeedFault::UnsupportedSymbol(symbol) => MarketDataError::UnsupportedSymbol(symbol),
            FeedFault::StreamExhausted { attempts } => MarketDataError::StreamExhausted { attempts },
        }
    }
}

/// What a feed tells its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<O> {
    /// The reconciled view changed
    Snapshot(O),
    Status(ConnectionStatus),
    TerminalError(FeedFault),
    /// Snapshot fetch failed; the feed carries on from the stream alone
    Degraded(String),
}

/// Requests from the consumer to a running feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedCommand {
    /// The left edge of the visible range moved (unix seconds)
    VisibleRange { from: i64 },
}

/// Sticky indicators derived from a feed's events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedFlags {
    pub not_on_exchange: bool,
    pub ws_error: bool,
    pub using_cached_data: bool,
}

impl FeedFlags {
    pub fn observe<O>(&mut self, event: &FeedEvent<O>) {
        match event {
            FeedEvent::TerminalError(FeedFault::UnsupportedSymbol(_)) => {
                self.not_on_exchange = true;
            }
            FeedEvent::TerminalError(FeedFault::StreamExhausted { .. }) => {
                self.ws_error = true;
            }
            FeedEvent::Status(ConnectionStatus::Erroring) => self.ws_error = true,
            FeedEvent::Status(ConnectionStatus::Open) => self.ws_error = false,
            FeedEvent::Degraded(_) => self.using_cached_data = true,
            FeedEvent::Snapshot(_) | FeedEvent::Status(_) => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Reconciler timer period
    pub tick_interval: Duration,
    /// Minimum spacing between applied flushes
    pub update_throttle: Duration,
    pub history_trigger_secs: i64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            update_throttle: Duration::from_millis(250),
            history_trigger_secs: 60,
        }
    }
}

impl From<&Config> for FeedSettings {
    fn from(config: &Config) -> Self {
        Self {
            tick_interval: config.tick_interval(),
            update_throttle: config.update_throttle(),
            history_trigger_secs: config.history_trigger_secs,
        }
    }
}

/// Shared collaborators every feed runs against
#[derive(Clone)]
pub struct FeedContext {
    pub source: Arc<dyn MarketDataSource>,
    pub gate: Arc<SymbolSupportGate>,
    pub subscriber: StreamSubscriber,
    pub settings: FeedSettings,
}

impl FeedContext {
    /// Live REST, symbol gate and WebSocket wiring from configuration
    pub fn from_config(config: &Config, metrics: &SyncMetrics) -> Result<Self> {
        let rest = Arc::new(
            RestClient::new(&config.rest_endpoint, config.retry_policy())?
                .with_rate_limit_counter(metrics.rate_limit_retries()),
        );
        let gate = Arc::new(SymbolSupportGate::new(
            rest.clone(),
            Arc::new(SystemClock),
            config.symbol_cache_ttl(),
        ));
        let subscriber = StreamSubscriber::new(
            Arc::new(TungsteniteConnector),
            &config.ws_endpoint,
            SubscriberSettings {
                max_attempts: config.max_reconnect_attempts,
                base_delay: config.reconnect_base_delay(),
                stale_timeout: config.stale_stream_timeout(),
            },
        );

        Ok(Self {
            source: rest,
            gate,
            subscriber,
            settings: FeedSettings::from(config),
        })
    }
}

/// Consumer side of a running feed
pub struct FeedHandle<O> {
    symbol: String,
    feed: &'static str,
    cancel: CancellationToken,
    commands: mpsc::Sender<FeedCommand>,
    events: mpsc::Receiver<FeedEvent<O>>,
    flags: FeedFlags,
    task: Option<JoinHandle<()>>,
}

impl<O> FeedHandle<O> {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn feed(&self) -> &'static str {
        self.feed
    }

    pub fn flags(&self) -> FeedFlags {
        self.flags
    }

    /// Next event; `None` once the feed has stopped and its events are drained
    pub async fn recv(&mut self) -> Option<FeedEvent<O>> {
        let event = self.events.recv().await?;
        self.flags.observe(&event);
        Some(event)
    }

    /// Report the visible range's left edge (drives candle history paging)
    pub fn visible_range(&self, from: i64) {
        if self
            .commands
            .try_send(FeedCommand::VisibleRange { from })
            .is_err()
        {
            debug!(symbol = %self.symbol, feed = self.feed, "Visible range update dropped");
        }
    }

    /// Stop the feed; repeat calls do nothing
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            debug!(symbol = %self.symbol, feed = self.feed, "Closing feed");
        }
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close and wait for the feed task to finish
    pub async fn shutdown(mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl<O> Drop for FeedHandle<O> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start a feed for `symbol`; it runs until the handle is closed or dropped
/// or `parent` is cancelled
pub fn spawn_feed<K: FeedKind>(
    kind: K,
    symbol: &str,
    ctx: &FeedContext,
    parent: &CancellationToken,
) -> FeedHandle<OutputOf<K>> {
    let cancel = parent.child_token();
    let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let feed = kind.name();

    let task = tokio::spawn(run_feed(
        kind,
        symbol.to_string(),
        ctx.clone(),
        event_tx,
        command_rx,
        cancel.clone(),
    ));

    FeedHandle {
        symbol: symbol.to_string(),
        feed,
        cancel,
        commands: command_tx,
        events: event_rx,
        flags: FeedFlags::default(),
        task: Some(task),
    }
}

async fn run_feed<K: FeedKind>(
    kind: K,
    symbol: String,
    ctx: FeedContext,
    events: mpsc::Sender<FeedEvent<OutputOf<K>>>,
    mut commands: mpsc::Receiver<FeedCommand>,
    cancel: CancellationToken,
) {
    let feed = kind.name();

    let supported = tokio::select! {
        _ = cancel.cancelled() => return,
        supported = ctx.gate.is_supported(&symbol) => supported,
    };
    if !supported {
        warn!(symbol = %symbol, feed, "Symbol not available on the exchange");
        let fault = FeedFault::UnsupportedSymbol(symbol.clone());
        let _ = events.send(FeedEvent::TerminalError(fault)).await;
        return;
    }

    let (stream_tx, mut stream_rx) = mpsc::channel(STREAM_BUFFER);
    let stream = ctx
        .subscriber
        .subscribe(&symbol, &kind.channel(), stream_tx, &cancel);
    let mut stream_live = true;

    let mut reconciler =
        ThrottledReconciler::new(kind.strategy(&symbol), ctx.settings.update_throttle);
    let mut pager = HistoryPager::new(ctx.settings.history_trigger_secs);

    let mut snapshot = Some(kind.fetch_snapshot(ctx.source.as_ref(), &symbol));
    let mut older: Option<BoxFuture<'_, Result<SnapshotOf<K>>>> = None;

    let mut ticker = interval(ctx.settings.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(symbol = %symbol, feed, "Feed started");

    loop {
        let changed = tokio::select! {
            _ = cancel.cancelled() => break,

            Some(result) = OptionFuture::from(snapshot.as_mut()) => {
                snapshot = None;
                match result {
                    Ok(data) => reconciler.seed(data),
                    Err(e) => {
                        warn!(symbol = %symbol, feed, error = %e, "Snapshot fetch failed, continuing stream-only");
                        if events.send(FeedEvent::Degraded(e.to_string())).await.is_err() {
                            break;
                        }
                        false
                    }
                }
            }

            Some(result) = OptionFuture::from(older.as_mut()) => {
                older = None;
                let outcome = result.map(|page| kind.prepend_older(reconciler.view_mut(), page));
                pager.complete(outcome) > 0
            }

            event = stream_rx.recv(), if stream_live => match event {
                Some(StreamEvent::Message(raw)) => match kind.decode(&raw) {
                    Ok(Some(update)) => {
                        reconciler.push(update);
                        reconciler.is_immediate() && reconciler.flush(Instant::now())
                    }
                    Ok(None) => false,
                    Err(e) => {
                        warn!(symbol = %symbol, feed, error = %e, "Dropping undecodable stream message");
                        false
                    }
                },
                Some(StreamEvent::Status(status)) => {
                    if events.send(FeedEvent::Status(status)).await.is_err() {
                        break;
                    }
                    false
                }
                Some(StreamEvent::Exhausted { attempts }) => {
                    error!(symbol = %symbol, feed, attempts, "Stream unavailable");
                    let fault = FeedFault::StreamExhausted { attempts };
                    if events.send(FeedEvent::TerminalError(fault)).await.is_err() {
                        break;
                    }
                    false
                }
                None => {
                    stream_live = false;
                    false
                }
            },

            _ = ticker.tick() => reconciler.tick(Instant::now()),

            Some(command) = commands.recv() => match command {
                FeedCommand::VisibleRange { from } => {
                    match pager.start(from, kind.earliest_time(reconciler.view())) {
                        Some(before) => {
                            older = Some(kind.fetch_older(ctx.source.as_ref(), &symbol, before));
                        }
                        None => debug!(
                            symbol = %symbol,
                            feed,
                            from,
                            loading = pager.is_loading(),
                            exhausted = pager.no_more_historical(),
                            "No older page requested"
                        ),
                    }
                    false
                }
            },
        };

        if changed && events.send(FeedEvent::Snapshot(reconciler.output())).await.is_err() {
            break;
        }
    }

    if reconciler.has_pending() {
        debug!(symbol = %symbol, feed, discarded = reconciler.pending_len(), "Discarding buffered updates");
    }
    reconciler.discard_pending();
    stream.close();
    info!(symbol = %symbol, feed, "Feed stopped");
}
