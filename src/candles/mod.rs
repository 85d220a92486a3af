//! Candlestick series
//!
//! Points are kept sorted by bucket time with at most one point per bucket.

mod history;

pub use history::HistoryPager;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One candle; `time` is the bucket start in unix seconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandlePoint {
    pub time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// Ordered, bucket-deduplicated candle series
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandleSeries {
    points: Vec<CandlePoint>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[CandlePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn earliest_time(&self) -> Option<i64> {
        self.points.first().map(|p| p.time)
    }

    pub fn latest_time(&self) -> Option<i64> {
        self.points.last().map(|p| p.time)
    }

    /// Replace the point for the same bucket or insert a new bucket
    ///
    /// Returns true if the series changed.
    pub fn upsert(&mut self, point: CandlePoint) -> bool {
        match self.points.last_mut() {
            None => {
                self.points.push(point);
                true
            }
            Some(last) if last.time == point.time => {
                if *last == point {
                    return false;
                }
                *last = point;
                true
            }
            Some(last) if point.time > last.time => {
                self.points.push(point);
                true
            }
            Some(_) => match self.points.binary_search_by_key(&point.time, |p| p.time) {
                Ok(idx) => {
                    if self.points[idx] == point {
                        return false;
                    }
                    self.points[idx] = point;
                    true
                }
                Err(idx) => {
                    self.points.insert(idx, point);
                    true
                }
            },
        }
    }

    /// Prepend a page of history, discarding anything not strictly older than the earliest point
    ///
    /// Returns the number of points added.
    pub fn prepend_older(&mut self, page: Vec<CandlePoint>) -> usize {
        let mut older: Vec<CandlePoint> = match self.earliest_time() {
            Some(earliest) => page.into_iter().filter(|p| p.time < earliest).collect(),
            None => page,
        };
        older.sort_by_key(|p| p.time);
        older.dedup_by_key(|p| p.time);

        let added = older.len();
        if added > 0 {
            older.append(&mut self.points);
            self.points = older;
        }
        added
    }

    /// Install a REST snapshot under whatever the stream already delivered
    pub fn seed(&mut self, snapshot: Vec<CandlePoint>) -> bool {
        if snapshot.is_empty() {
            return false;
        }

        let mut base = CandleSeries::new();
        for point in snapshot {
            base.upsert(point);
        }

        if let Some(base_last) = base.latest_time() {
            for point in self.points.drain(..).filter(|p| p.time >= base_last) {
                base.upsert(point);
            }
        }

        let changed = base != *self;
        *self = base;
        changed
    }
}
