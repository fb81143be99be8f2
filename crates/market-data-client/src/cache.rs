use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;

use prediction_core::{Bar, DataWindowSpec, MarketDataProvider, PredictionError};

struct CacheEntry<T> {
    data: T,
    cached_at: Instant,
}

/// Caching decorator over a `MarketDataProvider`.
///
/// Several signal providers read the same history during one generation;
/// this keeps that at one upstream fetch per (symbol, window) instead of
/// one per provider. Keys include the window anchor, so a batch run for a
/// different date never reuses stale bars. Errors are not cached: a failed
/// fetch retries on the next call.
pub struct CachedMarketData {
    inner: Arc<dyn MarketDataProvider>,
    bars: DashMap<String, CacheEntry<Vec<Bar>>>,
    quotes: DashMap<String, CacheEntry<f64>>,
    closes: DashMap<String, CacheEntry<f64>>,
    ttl: Duration,
}

impl CachedMarketData {
    pub fn new(inner: Arc<dyn MarketDataProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            bars: DashMap::new(),
            quotes: DashMap::new(),
            closes: DashMap::new(),
            ttl,
        }
    }

    fn bars_key(symbol: &str, window: &DataWindowSpec) -> String {
        format!(
            "{}:{}:{}:{}",
            symbol.to_uppercase(),
            window.interval,
            window.lookback_days,
            window.anchor.format("%Y-%m-%dT%H:%M:%SZ"),
        )
    }

    fn fresh<T: Clone>(map: &DashMap<String, CacheEntry<T>>, key: &str, ttl: Duration) -> Option<T> {
        let entry = map.get(key)?;
        if entry.cached_at.elapsed() < ttl {
            Some(entry.data.clone())
        } else {
            None
        }
    }
}

#[async_trait]
impl MarketDataProvider for CachedMarketData {
    async fn history(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<Vec<Bar>, PredictionError> {
        let key = Self::bars_key(symbol, window);
        if let Some(bars) = Self::fresh(&self.bars, &key, self.ttl) {
            tracing::debug!("bar cache hit for {}", key);
            return Ok(bars);
        }

        let bars = self.inner.history(symbol, window).await?;
        self.bars.insert(
            key,
            CacheEntry {
                data: bars.clone(),
                cached_at: Instant::now(),
            },
        );
        Ok(bars)
    }

    async fn quote(&self, symbol: &str) -> Result<f64, PredictionError> {
        let key = symbol.to_uppercase();
        if let Some(price) = Self::fresh(&self.quotes, &key, self.ttl) {
            return Ok(price);
        }

        let price = self.inner.quote(symbol).await?;
        self.quotes.insert(
            key,
            CacheEntry {
                data: price,
                cached_at: Instant::now(),
            },
        );
        Ok(price)
    }

    async fn closing_price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<f64, PredictionError> {
        let key = format!("{}:{}", symbol.to_uppercase(), date);
        if let Some(close) = Self::fresh(&self.closes, &key, self.ttl) {
            return Ok(close);
        }

        let close = self.inner.closing_price(symbol, date).await?;
        self.closes.insert(
            key,
            CacheEntry {
                data: close,
                cached_at: Instant::now(),
            },
        );
        Ok(close)
    }
}
