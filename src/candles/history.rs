//! Paging of older candles as the visible range scrolls left

use tracing::{debug, info, warn};

use crate::error::Result;

/// Guards historical page loads: one in flight at a time, none after history runs out
#[derive(Debug, Clone)]
pub struct HistoryPager {
    /// Load when the visible left edge is within this many seconds of the earliest point
    trigger_secs: i64,
    loading: bool,
    exhausted: bool,
}

impl HistoryPager {
    pub fn new(trigger_secs: i64) -> Self {
        Self {
            trigger_secs,
            loading: false,
            exhausted: false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn no_more_historical(&self) -> bool {
        self.exhausted
    }

    /// Whether a scroll to `visible_from` should fetch an older page
    pub fn should_load(&self, visible_from: i64, earliest: Option<i64>) -> bool {
        if self.loading || self.exhausted {
            return false;
        }
        match earliest {
            Some(earliest) => visible_from.saturating_sub(earliest) <= self.trigger_secs,
            None => false,
        }
    }

    /// Claim the in-flight slot; returns the earliest loaded time to page back from
    pub fn start(&mut self, visible_from: i64, earliest: Option<i64>) -> Option<i64> {
        if !self.should_load(visible_from, earliest) {
            return None;
        }
        self.loading = true;
        debug!(visible_from, earliest = ?earliest, "Loading older candles");
        earliest
    }

    /// Release the in-flight slot with the number of points the page added
    ///
    /// A page with nothing strictly older ends pagination for good; a failed
    /// fetch leaves it open so a later scroll can retry.
    pub fn complete(&mut self, outcome: Result<usize>) -> usize {
        self.loading = false;
        match outcome {
            Ok(0) => {
                self.exhausted = true;
                info!("No more historical candles");
                0
            }
            Ok(added) => added,
            Err(e) => {
                warn!(error = %e, "Failed to load older candles");
                0
            }
        }
    }
}
