//! Configuration module for market data synchronization

use serde::Deserialize;
use std::time::Duration;

use crate::error::{MarketDataError, Result};
use crate::rest::RetryPolicy;

const ENV_PREFIX: &str = "MARKET_SYNC";
const CONFIG_FILE: &str = "config/market-sync";

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Trading symbols to follow (e.g., ["BTCUSDT", "ETHUSDT"])
    pub symbols: Vec<String>,

    /// Backend REST base for snapshots and the symbol list
    pub rest_endpoint: String,

    /// WebSocket base for push streams
    pub ws_endpoint: String,

    /// Order book depth levels kept per side
    pub depth_levels: usize,

    /// Visible trade tape length
    pub max_trades: usize,

    /// Candle bucket interval (exchange notation, e.g. "1h")
    pub candle_interval: String,
    pub candle_limit: u16,

    /// Reconciler tick and minimum spacing between applications
    pub tick_interval_ms: u64,
    pub update_throttle_ms: u64,

    /// Reconnection settings
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub stale_stream_secs: u64,

    /// HTTP 429 back-off
    pub rate_limit_base_delay_ms: u64,
    pub rate_limit_max_delay_ms: u64,
    pub rate_limit_max_retries: u32,

    pub symbol_cache_ttl_secs: u64,

    /// Load older candles once the visible left edge is this close to the earliest point
    pub history_trigger_secs: i64,

    /// IPC socket for publishing views; publishing is off when unset
    #[serde(default)]
    pub ipc_socket_path: Option<String>,

    pub health_port: u16,
}

impl Config {
    /// Load configuration from defaults, an optional file and `MARKET_SYNC_*` variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .set_default("symbols", vec!["BTCUSDT"])?
            .set_default("rest_endpoint", "http://localhost:3001/api")?
            .set_default("ws_endpoint", "wss://stream.binance.com:9443/ws")?
            .set_default("depth_levels", 20_i64)?
            .set_default("max_trades", 50_i64)?
            .set_default("candle_interval", "1h")?
            .set_default("candle_limit", 500_i64)?
            .set_default("tick_interval_ms", 100_i64)?
            .set_default("update_throttle_ms", 250_i64)?
            .set_default("max_reconnect_attempts", 5_i64)?
            .set_default("reconnect_base_delay_ms", 1000_i64)?
            .set_default("stale_stream_secs", 45_i64)?
            .set_default("rate_limit_base_delay_ms", 1000_i64)?
            .set_default("rate_limit_max_delay_ms", 5000_i64)?
            .set_default("rate_limit_max_retries", 3_i64)?
            .set_default("symbol_cache_ttl_secs", 300_i64)?
            .set_default("history_trigger_secs", 60_i64)?
            .set_default("health_port", 9090_i64)?
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("symbols"),
            )
            .build()?;

        let mut config: Config = settings.try_deserialize()?;
        config.symbols = config
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the reconciler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(MarketDataError::ConfigError("no symbols configured".to_string()));
        }
        if self.depth_levels == 0 || self.max_trades == 0 {
            return Err(MarketDataError::ConfigError(
                "depth_levels and max_trades must be positive".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 || self.update_throttle_ms == 0 {
            return Err(MarketDataError::ConfigError(
                "tick_interval_ms and update_throttle_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn update_throttle(&self) -> Duration {
        Duration::from_millis(self.update_throttle_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn stale_stream_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_stream_secs)
    }

    pub fn symbol_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.symbol_cache_ttl_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.rate_limit_base_delay_ms),
            max_delay: Duration::from_millis(self.rate_limit_max_delay_ms),
            max_retries: self.rate_limit_max_retries,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            symbols: vec!["BTCUSDT".to_string()],
            rest_endpoint: "http://localhost:3001/api".to_string(),
            ws_endpoint: "wss://stream.binance.com:9443/ws".to_string(),
            depth_levels: 20,
            max_trades: 50,
            candle_interval: "1h".to_string(),
            candle_limit: 500,
            tick_interval_ms: 100,
            update_throttle_ms: 250,
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 1000,
            stale_stream_secs: 45,
            rate_limit_base_delay_ms: 1000,
            rate_limit_max_delay_ms: 5000,
            rate_limit_max_retries: 3,
            symbol_cache_ttl_secs: 300,
            history_trigger_secs: 60,
            ipc_socket_path: None,
            health_port: 9090,
        }
    }
}
