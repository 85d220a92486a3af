//! Core order book implementation
//!
//! Uses BTreeMap for efficient sorted price level management. Every
//! applied snapshot replaces both sides together.

use chrono::Utc;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use super::{Level, OrderBookMetrics, OrderBookView, PriceDirection};
use crate::parser::{DepthSnapshot, PriceLevel};

/// Order book for a single symbol
#[derive(Debug, Clone)]
pub struct OrderBook {
    symbol: String,
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Last applied update ID, when the source provides one
    last_update_id: Option<u64>,
    /// Whether any snapshot has been applied
    initialized: bool,
    /// Maximum depth levels to maintain
    max_depth: usize,
    /// Movement of the best bid on the last applied snapshot
    price_direction: PriceDirection,
    /// Timestamp of last applied snapshot (milliseconds)
    last_update_time: i64,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new(symbol: &str, max_depth: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: None,
            initialized: false,
            max_depth,
            price_direction: PriceDirection::Neutral,
            last_update_time: 0,
        }
    }

    /// Whether a snapshot is older than the one already applied
    pub fn is_stale(&self, snapshot: &DepthSnapshot) -> bool {
        matches!(
            (self.last_update_id, snapshot.last_update_id),
            (Some(current), Some(incoming)) if incoming < current
        )
    }

    /// Replace both sides with a full snapshot
    ///
    /// Returns true if the visible book changed. Stale snapshots and
    /// snapshots identical to the current book are not applied.
    pub fn replace(&mut self, snapshot: &DepthSnapshot) -> bool {
        if self.is_stale(snapshot) {
            return false;
        }

        let (bids, asks) = self.build_sides(snapshot);
        if snapshot.last_update_id.is_some() {
            self.last_update_id = snapshot.last_update_id;
        }

        if self.initialized && bids == self.bids && asks == self.asks {
            return false;
        }

        let previous_bid = self.best_bid();
        self.bids = bids;
        self.asks = asks;
        self.price_direction = match (previous_bid, self.best_bid()) {
            (Some(prev), Some(next)) if next > prev => PriceDirection::Up,
            (Some(prev), Some(next)) if next < prev => PriceDirection::Down,
            _ => PriceDirection::Neutral,
        };
        self.initialized = true;
        self.last_update_time = Utc::now().timestamp_millis();

        true
    }

    fn build_sides(
        &self,
        snapshot: &DepthSnapshot,
    ) -> (BTreeMap<Reverse<Decimal>, Decimal>, BTreeMap<Decimal, Decimal>) {
        let mut bids = BTreeMap::new();
        let mut asks = BTreeMap::new();

        for PriceLevel { price, quantity } in &snapshot.bids {
            if *quantity > Decimal::ZERO {
                bids.insert(Reverse(*price), *quantity);
            }
        }

        for PriceLevel { price, quantity } in &snapshot.asks {
            if *quantity > Decimal::ZERO {
                asks.insert(*price, *quantity);
            }
        }

        while bids.len() > self.max_depth {
            bids.pop_last();
        }
        while asks.len() > self.max_depth {
            asks.pop_last();
        }

        (bids, asks)
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    /// Get mid price
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::from(2)),
            _ => None,
        }
    }

    /// Get absolute spread
    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Get spread in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        match (self.spread(), self.mid_price()) {
            (Some(spread), Some(mid)) if mid > Decimal::ZERO => {
                Some(spread / mid * Decimal::from(10000))
            }
            _ => None,
        }
    }

    /// Calculate order book imbalance at top N levels
    pub fn imbalance(&self, levels: usize) -> Option<Decimal> {
        let bid_volume: Decimal = self.bids.iter().take(levels).map(|(_, q)| q).sum();
        let ask_volume: Decimal = self.asks.iter().take(levels).map(|(_, q)| q).sum();

        let total = bid_volume + ask_volume;
        if total > Decimal::ZERO {
            Some((bid_volume - ask_volume) / total)
        } else {
            None
        }
    }

    /// Check if the book has received a snapshot
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn last_update_id(&self) -> Option<u64> {
        self.last_update_id
    }

    pub fn price_direction(&self) -> PriceDirection {
        self.price_direction
    }

    /// Get current view for publishing
    pub fn view(&self) -> OrderBookView {
        OrderBookView {
            symbol: self.symbol.clone(),
            timestamp: self.last_update_time,
            last_update_id: self.last_update_id,
            bids: self
                .bids
                .iter()
                .map(|(Reverse(p), q)| Level {
                    price: *p,
                    quantity: *q,
                })
                .collect(),
            asks: self
                .asks
                .iter()
                .map(|(p, q)| Level {
                    price: *p,
                    quantity: *q,
                })
                .collect(),
            price_direction: self.price_direction,
            metrics: self.calculate_metrics(),
        }
    }

    /// Calculate order book metrics
    fn calculate_metrics(&self) -> OrderBookMetrics {
        OrderBookMetrics {
            best_bid: self.best_bid(),
            best_ask: self.best_ask(),
            mid_price: self.mid_price(),
            spread: self.spread(),
            spread_bps: self.spread_bps(),
            imbalance: self.imbalance(5),
            bid_depth: self.bids.values().copied().sum(),
            ask_depth: self.asks.values().copied().sum(),
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
        }
    }
}
