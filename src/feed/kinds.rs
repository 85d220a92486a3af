//! The three per-symbol feeds and how each is fetched, decoded and merged

use async_trait::async_trait;

use crate::candles::{CandlePoint, CandleSeries};
use crate::error::{MarketDataError, Result};
use crate::parser::{DepthSnapshot, ParsedMessage};
use crate::reconcile::{AppendBounded, MergeStrategy, ReplaceWhole, UpsertByKey};
use crate::rest::MarketDataSource;
use crate::trades::TradeTick;
use crate::websocket::StreamChannel;

pub type UpdateOf<K> = <<K as FeedKind>::Strategy as MergeStrategy>::Update;
pub type SnapshotOf<K> = <<K as FeedKind>::Strategy as MergeStrategy>::Snapshot;
pub type ViewOf<K> = <<K as FeedKind>::Strategy as MergeStrategy>::View;
pub type OutputOf<K> = <<K as FeedKind>::Strategy as MergeStrategy>::Output;

/// One kind of per-symbol data feed
#[async_trait]
pub trait FeedKind: Send + Sync + 'static {
    type Strategy: MergeStrategy;

    fn name(&self) -> &'static str;

    fn channel(&self) -> StreamChannel;

    fn strategy(&self, symbol: &str) -> Self::Strategy;

    async fn fetch_snapshot(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
    ) -> Result<<Self::Strategy as MergeStrategy>::Snapshot>;

    /// `Ok(None)` for frames that belong to some other stream
    fn decode(&self, raw: &str) -> Result<Option<<Self::Strategy as MergeStrategy>::Update>>;

    /// Earliest loaded key, for feeds that page history backwards
    fn earliest_time(&self, _view: &<Self::Strategy as MergeStrategy>::View) -> Option<i64> {
        None
    }

    async fn fetch_older(
        &self,
        _source: &dyn MarketDataSource,
        _symbol: &str,
        _before: i64,
    ) -> Result<<Self::Strategy as MergeStrategy>::Snapshot> {
        Err(MarketDataError::Network(format!(
            "{} feed has no history",
            self.name()
        )))
    }

    /// Merge an older page in front of the view; returns how many entries it added
    fn prepend_older(
        &self,
        _view: &mut <Self::Strategy as MergeStrategy>::View,
        _page: <Self::Strategy as MergeStrategy>::Snapshot,
    ) -> usize {
        0
    }
}

/// Full top-N book snapshots, last write wins
#[derive(Debug, Clone)]
pub struct OrderBookFeed {
    pub depth: usize,
}

#[async_trait]
impl FeedKind for OrderBookFeed {
    type Strategy = ReplaceWhole;

    fn name(&self) -> &'static str {
        "orderbook"
    }

    fn channel(&self) -> StreamChannel {
        StreamChannel::Depth { levels: self.depth }
    }

    fn strategy(&self, symbol: &str) -> ReplaceWhole {
        ReplaceWhole::new(symbol, self.depth)
    }

    async fn fetch_snapshot(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
    ) -> Result<DepthSnapshot> {
        source.order_book(symbol).await
    }

    fn decode(&self, raw: &str) -> Result<Option<DepthSnapshot>> {
        match ParsedMessage::parse(raw)? {
            ParsedMessage::Depth(snapshot) => Ok(Some(snapshot)),
            _ => Ok(None),
        }
    }
}

/// Bounded tape of the most recent trades
#[derive(Debug, Clone)]
pub struct TradesFeed {
    pub max_trades: usize,
}

#[async_trait]
impl FeedKind for TradesFeed {
    type Strategy = AppendBounded;

    fn name(&self) -> &'static str {
        "trades"
    }

    fn channel(&self) -> StreamChannel {
        StreamChannel::Trade
    }

    fn strategy(&self, _symbol: &str) -> AppendBounded {
        AppendBounded::new(self.max_trades)
    }

    async fn fetch_snapshot(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
    ) -> Result<Vec<TradeTick>> {
        source.recent_trades(symbol, self.max_trades).await
    }

    fn decode(&self, raw: &str) -> Result<Option<TradeTick>> {
        match ParsedMessage::parse(raw)? {
            ParsedMessage::Trade(trade) => Ok(Some(trade)),
            _ => Ok(None),
        }
    }
}

/// Candles keyed by bucket start, with backwards paging
#[derive(Debug, Clone)]
pub struct CandlesFeed {
    pub interval: String,
    pub limit: u16,
}

#[async_trait]
impl FeedKind for CandlesFeed {
    type Strategy = UpsertByKey;

    fn name(&self) -> &'static str {
        "candles"
    }

    fn channel(&self) -> StreamChannel {
        StreamChannel::Kline {
            interval: self.interval.clone(),
        }
    }

    fn strategy(&self, _symbol: &str) -> UpsertByKey {
        UpsertByKey
    }

    async fn fetch_snapshot(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
    ) -> Result<Vec<CandlePoint>> {
        source.klines(symbol, &self.interval, self.limit, None).await
    }

    fn decode(&self, raw: &str) -> Result<Option<CandlePoint>> {
        match ParsedMessage::parse(raw)? {
            ParsedMessage::Kline(point) => Ok(Some(point)),
            _ => Ok(None),
        }
    }

    fn earliest_time(&self, view: &CandleSeries) -> Option<i64> {
        view.earliest_time()
    }

    async fn fetch_older(
        &self,
        source: &dyn MarketDataSource,
        symbol: &str,
        before: i64,
    ) -> Result<Vec<CandlePoint>> {
        // Buckets opening strictly before `before`
        let end_time_ms = before.saturating_mul(1000).saturating_sub(1);
        source
            .klines(symbol, &self.interval, self.limit, Some(end_time_ms))
            .await
    }

    fn prepend_older(&self, view: &mut CandleSeries, page: Vec<CandlePoint>) -> usize {
        view.prepend_older(page)
    }
}
