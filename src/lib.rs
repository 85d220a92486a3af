//! Market Sync - real-time market data synchronization
//!
//! Keeps a bounded order book, trade tape and candle series per symbol in
//! step with an exchange: REST snapshots seed each view, push streams keep
//! it current, and a throttled reconciler decides when consumers see a new
//! version.

pub mod candles;
pub mod config;
pub mod error;
pub mod feed;
pub mod orderbook;
pub mod parser;
pub mod publisher;
pub mod reconcile;
pub mod rest;
pub mod symbols;
pub mod telemetry;
pub mod trades;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use candles::{CandlePoint, CandleSeries};
pub use config::Config;
pub use error::{MarketDataError, Result};
pub use feed::{
    FeedCommand, FeedContext, FeedEvent, FeedFault, FeedFlags, FeedHandle, MarketSession,
    SessionFeeds, SymbolFeeds,
};
pub use orderbook::{OrderBook, OrderBookMetrics, OrderBookView};
pub use publisher::Publisher;
pub use reconcile::{MergeStrategy, ThrottledReconciler};
pub use rest::{MarketDataSource, RestClient, RetryPolicy};
pub use symbols::SymbolSupportGate;
pub use telemetry::SyncMetrics;
pub use trades::TradeTick;
pub use websocket::{ConnectionStatus, StreamSubscriber};
