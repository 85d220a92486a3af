//! Prometheus counters for the sync pipeline

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use crate::feed::{FeedEvent, FeedFault};
use crate::websocket::ConnectionStatus;

/// Counters exported on `/metrics`
#[derive(Clone)]
pub struct SyncMetrics {
    registry: Registry,
    views_published: IntCounterVec,
    stream_disconnects: IntCounterVec,
    terminal_errors: IntCounterVec,
    snapshot_failures: IntCounterVec,
    rate_limit_retries: IntCounter,
}

impl SyncMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("market_sync".to_string()), None)?;

        let views_published = IntCounterVec::new(
            Opts::new("views_published_total", "Reconciled views handed to consumers"),
            &["feed"],
        )?;
        let stream_disconnects = IntCounterVec::new(
            Opts::new("stream_disconnects_total", "Stream closes that led to a reconnect or give-up"),
            &["feed"],
        )?;
        let terminal_errors = IntCounterVec::new(
            Opts::new("terminal_errors_total", "Feeds stopped by an unrecoverable condition"),
            &["feed", "fault"],
        )?;
        let snapshot_failures = IntCounterVec::new(
            Opts::new("snapshot_failures_total", "Initial snapshots that could not be fetched"),
            &["feed"],
        )?;
        let rate_limit_retries = IntCounter::new(
            "rate_limit_retries_total",
            "REST requests retried after HTTP 429",
        )?;

        registry.register(Box::new(views_published.clone()))?;
        registry.register(Box::new(stream_disconnects.clone()))?;
        registry.register(Box::new(terminal_errors.clone()))?;
        registry.register(Box::new(snapshot_failures.clone()))?;
        registry.register(Box::new(rate_limit_retries.clone()))?;

        Ok(Self {
            registry,
            views_published,
            stream_disconnects,
            terminal_errors,
            snapshot_failures,
            rate_limit_retries,
        })
    }

    /// Counter the REST client bumps on every 429 retry
    pub fn rate_limit_retries(&self) -> IntCounter {
        self.rate_limit_retries.clone()
    }

    pub fn observe<O>(&self, feed: &str, event: &FeedEvent<O>) {
        match event {
            FeedEvent::Snapshot(_) => self.views_published.with_label_values(&[feed]).inc(),
            FeedEvent::Status(ConnectionStatus::Disconnected) => {
                self.stream_disconnects.with_label_values(&[feed]).inc()
            }
            FeedEvent::Status(_) => {}
            FeedEvent::TerminalError(fault) => {
                let label = match fault {
                    FeedFault::UnsupportedSymbol(_) => "unsupported_symbol",
                    FeedFault::StreamExhausted { .. } => "stream_exhausted",
                };
                self.terminal_errors.with_label_values(&[feed, label]).inc();
            }
            FeedEvent::Degraded(_) => self.snapshot_failures.with_label_values(&[feed]).inc(),
        }
    }

    /// Prometheus text exposition
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
