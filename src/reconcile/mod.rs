//! Update buffering and throttled reconciliation
//!
//! Incoming push messages land in a pending buffer without touching the
//! visible view. A periodic tick drains the buffer into the view at most
//! once per throttle window. How updates are buffered and merged is up to
//! the [`MergeStrategy`] each feed plugs in.

mod strategies;

pub use strategies::{AppendBounded, ReplaceWhole, UpsertByKey};

use std::time::Duration;
use tokio::time::Instant;

/// How a feed folds pushes into its pending buffer and the buffer into its view
pub trait MergeStrategy: Send + 'static {
    /// One decoded push message
    type Update: Send + 'static;
    /// Initial dataset from the snapshot fetcher
    type Snapshot: Send + 'static;
    /// Authoritative reconciled state
    type View: Send + 'static;
    /// What the presentation layer receives
    type Output: Clone + Send + 'static;

    /// Skip throttling and apply every push as soon as it arrives
    const IMMEDIATE: bool = false;

    fn new_view(&self) -> Self::View;

    /// Fold one update into the pending buffer
    fn buffer(&self, pending: &mut Vec<Self::Update>, update: Self::Update);

    /// Apply drained updates; returns true if the view changed
    fn merge(&self, view: &mut Self::View, pending: Vec<Self::Update>) -> bool;

    /// Reconcile a REST snapshot with the view; returns true if the view changed
    fn seed(&self, view: &mut Self::View, snapshot: Self::Snapshot) -> bool;

    fn output(&self, view: &Self::View) -> Self::Output;
}

/// Pending buffer plus view, flushed on a throttled tick
pub struct ThrottledReconciler<S: MergeStrategy> {
    strategy: S,
    view: S::View,
    pending: Vec<S::Update>,
    throttle: Duration,
    last_applied: Option<Instant>,
}

impl<S: MergeStrategy> ThrottledReconciler<S> {
    pub fn new(strategy: S, throttle: Duration) -> Self {
        let view = strategy.new_view();
        Self {
            strategy,
            view,
            pending: Vec::new(),
            throttle,
            last_applied: None,
        }
    }

    /// Buffer a push message; the view is untouched until the next flush
    pub fn push(&mut self, update: S::Update) {
        self.strategy.buffer(&mut self.pending, update);
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Timer tick: flush if data is buffered and the throttle window has elapsed
    ///
    /// Returns true if the view changed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        if let Some(last) = self.last_applied {
            if now.saturating_duration_since(last) < self.throttle {
                return false;
            }
        }
        self.flush(now)
    }

    /// Drain the buffer into the view regardless of the throttle window
    pub fn flush(&mut self, now: Instant) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        let drained = std::mem::take(&mut self.pending);
        self.last_applied = Some(now);
        self.strategy.merge(&mut self.view, drained)
    }

    /// Apply the initial REST snapshot
    pub fn seed(&mut self, snapshot: S::Snapshot) -> bool {
        self.strategy.seed(&mut self.view, snapshot)
    }

    /// Drop buffered-but-unflushed updates
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    pub fn is_immediate(&self) -> bool {
        S::IMMEDIATE
    }

    pub fn view(&self) -> &S::View {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut S::View {
        &mut self.view
    }

    pub fn output(&self) -> S::Output {
        self.strategy.output(&self.view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candles::CandlePoint;
    use crate::parser::{DepthSnapshot, PriceLevel};
    use crate::trades::TradeTick;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const THROTTLE: Duration = Duration::from_millis(250);

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn depth(id: u64, bid: Decimal) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: Some(id),
            bids: vec![PriceLevel {
                price: bid,
                quantity: dec!(1),
            }],
            asks: vec![PriceLevel {
                price: bid + dec!(1),
                quantity: dec!(1),
            }],
        }
    }

    fn trade(ms: i64) -> TradeTick {
        TradeTick {
            price: Decimal::from(ms),
            amount: dec!(1),
            time: Utc.timestamp_millis_opt(ms).unwrap(),
            is_buyer_maker: false,
        }
    }

    fn candle(time: i64, close: Decimal) -> CandlePoint {
        CandlePoint {
            time,
            open: close,
            high: close,
            low: close,
            close,
        }
    }

    #[test]
    fn test_last_snapshot_in_window_wins() {
        let t0 = Instant::now();
        let mut reconciler = ThrottledReconciler::new(ReplaceWhole::new("BTCUSDT", 20), THROTTLE);

        // A flush just before the window opens
        reconciler.push(depth(1, dec!(100)));
        assert!(reconciler.tick(t0));

        reconciler.push(depth(2, dec!(101)));
        assert!(!reconciler.tick(t0 + ms(50)));
        reconciler.push(depth(3, dec!(102)));
        assert!(!reconciler.tick(t0 + ms(150)));
        reconciler.push(depth(4, dec!(103)));
        assert_eq!(reconciler.pending_len(), 1);

        assert!(reconciler.tick(t0 + ms(250)));
        assert_eq!(reconciler.view().best_bid(), Some(dec!(103)));
        assert_eq!(reconciler.view().last_update_id(), Some(4));
        assert!(!reconciler.has_pending());
    }

    #[test]
    fn test_window_measured_from_previous_flush() {
        let base = Instant::now();
        let mut reconciler = ThrottledReconciler::new(ReplaceWhole::new("BTCUSDT", 20), THROTTLE);

        // Book already live; its last flush was 100ms before snap1
        reconciler.push(depth(0, dec!(99)));
        assert!(reconciler.tick(base));
        let t = |n: u64| base + ms(100 + n);

        reconciler.push(depth(1, dec!(100)));
        reconciler.push(depth(2, dec!(101)));
        assert!(!reconciler.tick(t(100)));
        assert_eq!(reconciler.view().last_update_id(), Some(0));

        reconciler.push(depth(3, dec!(102)));
        assert!(reconciler.tick(t(200)));
        assert_eq!(reconciler.view().last_update_id(), Some(3));
        assert_eq!(reconciler.view().best_bid(), Some(dec!(102)));
    }

    #[test]
    fn test_cold_start_flushes_on_first_tick() {
        let t0 = Instant::now();
        let mut reconciler = ThrottledReconciler::new(ReplaceWhole::new("BTCUSDT", 20), THROTTLE);

        reconciler.push(depth(1, dec!(100)));
        reconciler.push(depth(2, dec!(101)));
        assert!(reconciler.tick(t0 + ms(100)));
        assert_eq!(reconciler.view().last_update_id(), Some(2));

        // Next window opens 250ms after that flush
        reconciler.push(depth(3, dec!(102)));
        assert!(!reconciler.tick(t0 + ms(200)));
        assert!(!reconciler.tick(t0 + ms(300)));
        assert!(reconciler.tick(t0 + ms(400)));
        assert_eq!(reconciler.view().last_update_id(), Some(3));
    }

    #[test]
    fn test_tick_without_pending_is_noop() {
        let mut reconciler = ThrottledReconciler::new(ReplaceWhole::new("BTCUSDT", 20), THROTTLE);
        assert!(!reconciler.tick(Instant::now()));
        assert!(!reconciler.view().is_initialized());
    }

    #[test]
    fn test_trades_flush_newest_first_bounded() {
        let mut reconciler = ThrottledReconciler::new(AppendBounded::new(2), THROTTLE);
        reconciler.push(trade(1));
        reconciler.push(trade(2));
        reconciler.push(trade(3));

        assert!(reconciler.tick(Instant::now()));
        let times: Vec<_> = reconciler
            .output()
            .iter()
            .map(|t| t.time.timestamp_millis())
            .collect();
        assert_eq!(times, vec![3, 2]);
    }

    #[test]
    fn test_trade_buffer_is_capped() {
        let mut reconciler = ThrottledReconciler::new(AppendBounded::new(3), THROTTLE);
        for i in 0..20 {
            reconciler.push(trade(i));
        }
        assert_eq!(reconciler.pending_len(), 6);

        reconciler.tick(Instant::now());
        let times: Vec<_> = reconciler
            .output()
            .iter()
            .map(|t| t.time.timestamp_millis())
            .collect();
        assert_eq!(times, vec![19, 18, 17]);
    }

    #[test]
    fn test_candles_apply_immediately() {
        let mut reconciler = ThrottledReconciler::new(UpsertByKey, THROTTLE);
        assert!(reconciler.is_immediate());

        let t0 = Instant::now();
        reconciler.push(candle(60, dec!(1)));
        assert!(reconciler.flush(t0));
        reconciler.push(candle(60, dec!(2)));
        assert!(reconciler.flush(t0 + ms(1)));
        reconciler.push(candle(120, dec!(3)));
        assert!(reconciler.flush(t0 + ms(2)));

        let series = reconciler.output();
        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].close, dec!(2));
    }

    #[test]
    fn test_discard_pending() {
        let mut reconciler = ThrottledReconciler::new(AppendBounded::new(5), THROTTLE);
        reconciler.push(trade(1));
        reconciler.discard_pending();
        assert!(!reconciler.tick(Instant::now()));
        assert!(reconciler.output().is_empty());
    }
}
