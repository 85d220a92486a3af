//! Order book module
//!
//! Maintains the bounded, reconciled order book view fed by full depth snapshots.

mod book;
mod metrics;

pub use book::OrderBook;
pub use metrics::OrderBookMetrics;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Movement of the best bid between consecutive applied snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceDirection {
    Up,
    Down,
    #[default]
    Neutral,
}

/// A single level in the order book
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Order book view handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookView {
    pub symbol: String,
    pub timestamp: i64,
    pub last_update_id: Option<u64>,
    /// Highest first
    pub bids: Vec<Level>,
    /// Lowest first
    pub asks: Vec<Level>,
    pub price_direction: PriceDirection,
    pub metrics: OrderBookMetrics,
}

impl OrderBookView {
    /// Asks highest first, the way a vertical ladder draws them above the bids
    pub fn asks_for_display(&self) -> impl Iterator<Item = &Level> {
        self.asks.iter().rev()
    }
}
