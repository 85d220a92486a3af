//! The feeds backing whichever symbol is currently on screen

use tokio_util::sync::CancellationToken;
use tracing::info;

use super::kinds::{CandlesFeed, OrderBookFeed, TradesFeed};
use super::{spawn_feed, FeedContext, FeedFlags, FeedHandle};
use crate::candles::CandleSeries;
use crate::config::Config;
use crate::orderbook::OrderBookView;
use crate::symbols::normalize_symbol;
use crate::trades::TradeTick;

/// Parameters for the three feeds opened per symbol
#[derive(Debug, Clone)]
pub struct SessionFeeds {
    pub order_book: OrderBookFeed,
    pub trades: TradesFeed,
    pub candles: CandlesFeed,
}

impl From<&Config> for SessionFeeds {
    fn from(config: &Config) -> Self {
        Self {
            order_book: OrderBookFeed {
                depth: config.depth_levels,
            },
            trades: TradesFeed {
                max_trades: config.max_trades,
            },
            candles: CandlesFeed {
                interval: config.candle_interval.clone(),
                limit: config.candle_limit,
            },
        }
    }
}

/// Running feeds for one symbol
pub struct SymbolFeeds {
    pub order_book: FeedHandle<OrderBookView>,
    pub trades: FeedHandle<Vec<TradeTick>>,
    pub candles: FeedHandle<CandleSeries>,
}

impl SymbolFeeds {
    pub fn symbol(&self) -> &str {
        self.order_book.symbol()
    }

    /// Flags of all three feeds combined
    pub fn flags(&self) -> FeedFlags {
        [
            self.order_book.flags(),
            self.trades.flags(),
            self.candles.flags(),
        ]
        .into_iter()
        .fold(FeedFlags::default(), |acc, f| FeedFlags {
            not_on_exchange: acc.not_on_exchange || f.not_on_exchange,
            ws_error: acc.ws_error || f.ws_error,
            using_cached_data: acc.using_cached_data || f.using_cached_data,
        })
    }

    pub fn close(&self) {
        self.order_book.close();
        self.trades.close();
        self.candles.close();
    }
}

/// Owns the feeds of the active symbol and swaps them on symbol change
pub struct MarketSession {
    ctx: FeedContext,
    feeds: SessionFeeds,
    root: CancellationToken,
    active: Option<SymbolFeeds>,
}

impl MarketSession {
    pub fn new(ctx: FeedContext, feeds: SessionFeeds) -> Self {
        Self {
            ctx,
            feeds,
            root: CancellationToken::new(),
            active: None,
        }
    }

    pub fn symbol(&self) -> Option<&str> {
        self.active.as_ref().map(SymbolFeeds::symbol)
    }

    pub fn feeds(&self) -> Option<&SymbolFeeds> {
        self.active.as_ref()
    }

    pub fn feeds_mut(&mut self) -> Option<&mut SymbolFeeds> {
        self.active.as_mut()
    }

    /// Tear down the current symbol's feeds, then open all three for `symbol`
    pub fn switch_symbol(&mut self, symbol: &str) -> &mut SymbolFeeds {
        self.close();

        let symbol = normalize_symbol(symbol);
        info!(symbol = %symbol, "Opening feeds");
        let feeds = SymbolFeeds {
            order_book: spawn_feed(self.feeds.order_book.clone(), &symbol, &self.ctx, &self.root),
            trades: spawn_feed(self.feeds.trades.clone(), &symbol, &self.ctx, &self.root),
            candles: spawn_feed(self.feeds.candles.clone(), &symbol, &self.ctx, &self.root),
        };
        self.active.insert(feeds)
    }

    /// Close the active feeds; their pending events are discarded
    pub fn close(&mut self) {
        if let Some(feeds) = self.active.take() {
            info!(symbol = %feeds.symbol(), "Closing feeds");
            feeds.close();
        }
    }
}

impl Drop for MarketSession {
    fn drop(&mut self) {
        self.root.cancel();
    }
}
