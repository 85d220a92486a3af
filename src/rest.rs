//! Snapshot fetcher for the backend REST API
//!
//! Retrieves the initial bounded datasets (order book, recent trades,
//! candles) and the supported-symbol list. HTTP 429 responses are retried
//! with capped exponential back-off; every other failure is returned to
//! the caller, which falls back to stream-only operation.

use async_trait::async_trait;
use prometheus::IntCounter;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::candles::CandlePoint;
use crate::error::{MarketDataError, Result};
use crate::parser::{DepthSnapshot, KlineRow, SymbolsResponse, TradesResponse};
use crate::trades::TradeTick;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Back-off applied to rate-limited requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// `min(base * 2^retry, max)`
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            max_retries: 3,
        }
    }
}

/// Initial datasets a feed seeds itself from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn order_book(&self, symbol: &str) -> Result<DepthSnapshot>;

    async fn recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradeTick>>;

    /// Candles whose open time is at or before `end_time_ms`, oldest first
    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<CandlePoint>>;
}

/// REST client for snapshots and reference data
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
    rate_limit_retries: Option<IntCounter>,
}

impl RestClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
            rate_limit_retries: None,
        })
    }

    /// Count every 429 retry on `counter`
    pub fn with_rate_limit_counter(mut self, counter: IntCounter) -> Self {
        self.rate_limit_retries = Some(counter);
        self
    }

    /// GET `path` and decode the JSON body, retrying on 429
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut retry = 0;

        loop {
            debug!(url = %url, query = ?query, retry, "REST request");
            let response = self.http.get(&url).query(query).send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                if retry >= self.retry.max_retries {
                    warn!(url = %url, retries = retry, "Rate limited, giving up");
                    return Err(MarketDataError::RateLimited { retries: retry });
                }
                let delay = self.retry.delay(retry);
                warn!(
                    url = %url,
                    retry = retry + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                if let Some(counter) = &self.rate_limit_retries {
                    counter.inc();
                }
                sleep(delay).await;
                retry += 1;
                continue;
            }

            if !status.is_success() {
                return Err(MarketDataError::HttpStatus {
                    status: status.as_u16(),
                    url,
                });
            }

            return Ok(response.json::<T>().await?);
        }
    }

    /// Full order book snapshot
    pub async fn fetch_order_book(&self, symbol: &str) -> Result<DepthSnapshot> {
        let snapshot: DepthSnapshot = self
            .get_json("/orderbook", &[("symbol", symbol.to_string())])
            .await?;
        info!(
            symbol = %symbol,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Fetched order book snapshot"
        );
        Ok(snapshot)
    }

    /// Most recent trades
    pub async fn fetch_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradeTick>> {
        let response: TradesResponse = self
            .get_json(
                "/trades",
                &[("symbol", symbol.to_string()), ("limit", limit.to_string())],
            )
            .await?;
        let trades = response
            .trades
            .into_iter()
            .map(TradeTick::try_from)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        info!(symbol = %symbol, count = trades.len(), "Fetched recent trades");
        Ok(trades)
    }

    /// Candles ending at `end_time_ms` (exclusive upper bound is up to the caller)
    pub async fn fetch_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<CandlePoint>> {
        let mut query = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(end) = end_time_ms {
            query.push(("endTime", end.to_string()));
        }

        let rows: Vec<KlineRow> = self.get_json("/klines", &query).await?;
        info!(symbol = %symbol, interval = %interval, count = rows.len(), "Fetched klines");
        Ok(rows.into_iter().map(|row| row.0).collect())
    }

    /// Tradable symbols on the venue
    pub async fn fetch_symbols(&self) -> Result<Vec<String>> {
        let response: SymbolsResponse = self.get_json("/binance-symbols", &[]).await?;
        Ok(response.symbols.into_iter().map(|s| s.symbol).collect())
    }
}

#[async_trait]
impl MarketDataSource for RestClient {
    async fn order_book(&self, symbol: &str) -> Result<DepthSnapshot> {
        self.fetch_order_book(symbol).await
    }

    async fn recent_trades(&self, symbol: &str, limit: usize) -> Result<Vec<TradeTick>> {
        self.fetch_trades(symbol, limit).await
    }

    async fn klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u16,
        end_time_ms: Option<i64>,
    ) -> Result<Vec<CandlePoint>> {
        self.fetch_klines(symbol, interval, limit, end_time_ms).await
    }
}
