//! Symbol support gate
//!
//! A TTL-cached view of the venue's tradable symbols, consulted before any
//! fetch or stream is opened for a symbol. Failed refreshes never raise:
//! the previous list keeps being served (empty if there never was one) and
//! the next check tries again.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::rest::RestClient;

/// Time source for cache expiry
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Tokio's clock (pausable in tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Where the tradable-symbol list comes from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SymbolSource: Send + Sync {
    async fn fetch_symbols(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl SymbolSource for RestClient {
    async fn fetch_symbols(&self) -> Result<Vec<String>> {
        RestClient::fetch_symbols(self).await
    }
}

#[derive(Debug, Default)]
struct CacheState {
    symbols: HashSet<String>,
    last_fetch: Option<Instant>,
}

/// Shared, TTL-cached supported-symbol predicate
pub struct SymbolSupportGate {
    source: Arc<dyn SymbolSource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: RwLock<CacheState>,
}

impl SymbolSupportGate {
    pub fn new(source: Arc<dyn SymbolSource>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            source,
            clock,
            ttl,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Whether the data source carries `symbol` (exchange prefix optional, case-insensitive)
    pub async fn is_supported(&self, symbol: &str) -> bool {
        let key = normalize_symbol(symbol);
        if key.is_empty() {
            return false;
        }

        self.refresh_if_stale().await;
        let supported = self.state.read().await.symbols.contains(&key);
        debug!(symbol = %key, supported, "Symbol support check");
        supported
    }

    async fn refresh_if_stale(&self) {
        let now = self.clock.now();
        {
            let state = self.state.read().await;
            if let Some(last) = state.last_fetch {
                if now.saturating_duration_since(last) < self.ttl {
                    return;
                }
            }
        }

        // Concurrent checks may each refetch; the list is small and idempotent
        match self.source.fetch_symbols().await {
            Ok(list) => {
                let mut state = self.state.write().await;
                state.symbols = list.iter().map(|s| normalize_symbol(s)).collect();
                state.last_fetch = Some(now);
                info!(count = state.symbols.len(), "Refreshed supported symbol list");
            }
            Err(e) => {
                let cached = self.state.read().await.symbols.len();
                warn!(error = %e, cached, "Symbol list refresh failed");
            }
        }
    }
}

/// `"BINANCE:btc/usdt"` -> `"BTCUSDT"`
pub fn normalize_symbol(symbol: &str) -> String {
    let symbol = symbol.trim();
    let bare = symbol
        .rsplit_once(':')
        .map(|(_, bare)| bare)
        .unwrap_or(symbol);
    bare.replace('/', "").to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketDataError;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    struct ManualClock {
        base: Instant,
        offset_ms: AtomicU64,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                base: Instant::now(),
                offset_ms: AtomicU64::new(0),
            }
        }

        fn advance(&self, by: Duration) {
            self.offset_ms
                .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.base + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }
    }

    const TTL: Duration = Duration::from_secs(300);

    fn gate(source: MockSymbolSource, clock: Arc<ManualClock>) -> SymbolSupportGate {
        SymbolSupportGate::new(Arc::new(source), clock, TTL)
    }

    #[test]
    fn test_normalize_symbol() {
        assert_eq!(normalize_symbol("BINANCE:btcusdt"), "BTCUSDT");
        assert_eq!(normalize_symbol(" eth/usdt "), "ETHUSDT");
        assert_eq!(normalize_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[tokio::test]
    async fn test_fetches_once_per_ttl() {
        let mut source = MockSymbolSource::new();
        source
            .expect_fetch_symbols()
            .times(2)
            .returning(|| Ok(vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()]));
        let clock = Arc::new(ManualClock::new());
        let gate = gate(source, clock.clone());

        assert!(gate.is_supported("BTCUSDT").await);
        assert!(!gate.is_supported("XYZUSDT").await);
        clock.advance(Duration::from_secs(299));
        assert!(gate.is_supported("BINANCE:ETHUSDT").await);

        clock.advance(Duration::from_secs(1));
        assert!(gate.is_supported("BTCUSDT").await);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let mut source = MockSymbolSource::new();
        source
            .expect_fetch_symbols()
            .times(2)
            .returning(|| Err(MarketDataError::Network("unreachable".to_string())));
        let clock = Arc::new(ManualClock::new());
        let gate = gate(source, clock.clone());

        assert!(!gate.is_supported("XYZUSDT").await);
        clock.advance(Duration::from_millis(1));
        assert!(!gate.is_supported("XYZUSDT").await);
    }

    #[tokio::test]
    async fn test_stale_list_served_when_refresh_fails() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut source = MockSymbolSource::new();
        source.expect_fetch_symbols().times(3).returning(move || {
            match counter.fetch_add(1, Ordering::SeqCst) {
                0 => Ok(vec!["BTCUSDT".to_string()]),
                _ => Err(MarketDataError::RateLimited { retries: 3 }),
            }
        });
        let clock = Arc::new(ManualClock::new());
        let gate = gate(source, clock.clone());

        assert!(gate.is_supported("BTCUSDT").await);
        clock.advance(TTL + Duration::from_secs(1));
        assert!(gate.is_supported("BTCUSDT").await);
        assert!(gate.is_supported("BTCUSDT").await);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_symbol_short_circuits() {
        let mut source = MockSymbolSource::new();
        source.expect_fetch_symbols().never();
        let gate = gate(source, Arc::new(ManualClock::new()));
        assert!(!gate.is_supported("  ").await);
    }
}
