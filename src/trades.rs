//! Bounded trade tape
//!
//! Keeps the most recent `max_trades` prints, newest first.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single executed trade
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeTick {
    pub price: Decimal,
    pub amount: Decimal,
    pub time: DateTime<Utc>,
    pub is_buyer_maker: bool,
}

/// Visible trade list, newest first, never longer than `max_trades`
#[derive(Debug, Clone)]
pub struct TradeTape {
    trades: Vec<TradeTick>,
    max_trades: usize,
}

impl TradeTape {
    pub fn new(max_trades: usize) -> Self {
        Self {
            trades: Vec::with_capacity(max_trades),
            max_trades,
        }
    }

    pub fn trades(&self) -> &[TradeTick] {
        &self.trades
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn max_trades(&self) -> usize {
        self.max_trades
    }

    /// Prepend trades given in arrival order
    ///
    /// Returns true if the visible tape changed.
    pub fn prepend(&mut self, arrived: Vec<TradeTick>) -> bool {
        if arrived.is_empty() {
            return false;
        }

        let mut merged = Vec::with_capacity(arrived.len() + self.trades.len());
        merged.extend(arrived.into_iter().rev());
        merged.append(&mut self.trades);
        self.trades = merged;
        self.normalize();
        true
    }

    /// Fill in history from a REST snapshot behind whatever the stream already delivered
    pub fn seed(&mut self, snapshot: Vec<TradeTick>) -> bool {
        if snapshot.is_empty() {
            return false;
        }

        let before = self.trades.clone();
        match self.trades.last().map(|t| t.time) {
            None => self.trades = snapshot,
            Some(oldest) => self
                .trades
                .extend(snapshot.into_iter().filter(|t| t.time < oldest)),
        }
        self.normalize();
        self.trades != before
    }

    fn normalize(&mut self) {
        // Stable, so same-millisecond prints keep their arrival order
        self.trades.sort_by(|a, b| b.time.cmp(&a.time));
        self.trades.truncate(self.max_trades);
    }
}
