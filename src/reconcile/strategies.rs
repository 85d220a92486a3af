//! Merge strategies for the three market feeds

use tracing::debug;

use super::MergeStrategy;
use crate::candles::{CandlePoint, CandleSeries};
use crate::orderbook::{OrderBook, OrderBookView};
use crate::parser::DepthSnapshot;
use crate::trades::{TradeTape, TradeTick};

/// Order book: every push is a full snapshot, the latest unapplied one wins
#[derive(Debug, Clone)]
pub struct ReplaceWhole {
    symbol: String,
    depth: usize,
}

impl ReplaceWhole {
    pub fn new(symbol: &str, depth: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            depth,
        }
    }
}

impl MergeStrategy for ReplaceWhole {
    type Update = DepthSnapshot;
    type Snapshot = DepthSnapshot;
    type View = OrderBook;
    type Output = OrderBookView;

    fn new_view(&self) -> OrderBook {
        OrderBook::new(&self.symbol, self.depth)
    }

    fn buffer(&self, pending: &mut Vec<DepthSnapshot>, update: DepthSnapshot) {
        if let Some(buffered) = pending.last() {
            if let (Some(held), Some(incoming)) = (buffered.last_update_id, update.last_update_id) {
                if incoming < held {
                    debug!(held, incoming, "Dropping out-of-order depth snapshot");
                    return;
                }
            }
        }
        pending.clear();
        pending.push(update);
    }

    fn merge(&self, view: &mut OrderBook, mut pending: Vec<DepthSnapshot>) -> bool {
        match pending.pop() {
            Some(snapshot) => view.replace(&snapshot),
            None => false,
        }
    }

    fn seed(&self, view: &mut OrderBook, snapshot: DepthSnapshot) -> bool {
        // The stream already painted a book; only a provably newer snapshot replaces it
        if view.is_initialized() {
            let newer = matches!(
                (view.last_update_id(), snapshot.last_update_id),
                (Some(current), Some(incoming)) if incoming > current
            );
            if !newer {
                return false;
            }
        }
        view.replace(&snapshot)
    }

    fn output(&self, view: &OrderBook) -> OrderBookView {
        view.view()
    }
}

/// Trades: pushes accumulate (bounded to twice the tape) and are prepended on flush
#[derive(Debug, Clone)]
pub struct AppendBounded {
    max_trades: usize,
}

impl AppendBounded {
    pub fn new(max_trades: usize) -> Self {
        Self { max_trades }
    }

    fn pending_cap(&self) -> usize {
        self.max_trades.saturating_mul(2)
    }
}

impl MergeStrategy for AppendBounded {
    type Update = TradeTick;
    type Snapshot = Vec<TradeTick>;
    type View = TradeTape;
    type Output = Vec<TradeTick>;

    fn new_view(&self) -> TradeTape {
        TradeTape::new(self.max_trades)
    }

    fn buffer(&self, pending: &mut Vec<TradeTick>, update: TradeTick) {
        pending.push(update);
        let cap = self.pending_cap();
        if pending.len() > cap {
            let overflow = pending.len() - cap;
            pending.drain(..overflow);
        }
    }

    fn merge(&self, view: &mut TradeTape, pending: Vec<TradeTick>) -> bool {
        view.prepend(pending)
    }

    fn seed(&self, view: &mut TradeTape, snapshot: Vec<TradeTick>) -> bool {
        view.seed(snapshot)
    }

    fn output(&self, view: &TradeTape) -> Vec<TradeTick> {
        view.trades().to_vec()
    }
}

/// Candles: each push upserts its bucket right away
#[derive(Debug, Clone, Copy, Default)]
pub struct UpsertByKey;

impl MergeStrategy for UpsertByKey {
    type Update = CandlePoint;
    type Snapshot = Vec<CandlePoint>;
    type View = CandleSeries;
    type Output = CandleSeries;

    const IMMEDIATE: bool = true;

    fn new_view(&self) -> CandleSeries {
        CandleSeries::new()
    }

    fn buffer(&self, pending: &mut Vec<CandlePoint>, update: CandlePoint) {
        pending.push(update);
    }

    fn merge(&self, view: &mut CandleSeries, pending: Vec<CandlePoint>) -> bool {
        pending
            .into_iter()
            .fold(false, |changed, point| view.upsert(point) | changed)
    }

    fn seed(&self, view: &mut CandleSeries, snapshot: Vec<CandlePoint>) -> bool {
        view.seed(snapshot)
    }

    fn output(&self, view: &CandleSeries) -> CandleSeries {
        view.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::PriceLevel;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn depth(id: Option<u64>, bid: Decimal) -> DepthSnapshot {
        DepthSnapshot {
            last_update_id: id,
            bids: vec![PriceLevel {
                price: bid,
                quantity: dec!(1),
            }],
            asks: vec![],
        }
    }

    #[test]
    fn test_replace_buffer_keeps_one() {
        let strategy = ReplaceWhole::new("BTCUSDT", 10);
        let mut pending = Vec::new();
        strategy.buffer(&mut pending, depth(Some(1), dec!(1)));
        strategy.buffer(&mut pending, depth(Some(2), dec!(2)));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].last_update_id, Some(2));
    }

    #[test]
    fn test_replace_buffer_ignores_older_arrival() {
        let strategy = ReplaceWhole::new("BTCUSDT", 10);
        let mut pending = Vec::new();
        strategy.buffer(&mut pending, depth(Some(5), dec!(5)));
        strategy.buffer(&mut pending, depth(Some(4), dec!(4)));
        assert_eq!(pending[0].last_update_id, Some(5));
    }

    #[test]
    fn test_seed_does_not_overwrite_stream_book() {
        let strategy = ReplaceWhole::new("BTCUSDT", 10);
        let mut book = strategy.new_view();
        assert!(strategy.merge(&mut book, vec![depth(None, dec!(200))]));

        assert!(!strategy.seed(&mut book, depth(Some(10), dec!(100))));
        assert_eq!(book.best_bid(), Some(dec!(200)));
    }

    #[test]
    fn test_seed_fills_empty_book() {
        let strategy = ReplaceWhole::new("BTCUSDT", 10);
        let mut book = strategy.new_view();
        assert!(strategy.seed(&mut book, depth(Some(10), dec!(100))));
        assert_eq!(book.last_update_id(), Some(10));
    }

    #[test]
    fn test_upsert_merge_reports_change() {
        let strategy = UpsertByKey;
        let mut series = strategy.new_view();
        let point = CandlePoint {
            time: 60,
            open: dec!(1),
            high: dec!(1),
            low: dec!(1),
            close: dec!(1),
        };
        assert!(strategy.merge(&mut series, vec![point.clone()]));
        assert!(!strategy.merge(&mut series, vec![point]));
    }
}
