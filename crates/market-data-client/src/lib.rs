//! HTTP market-data client.
//!
//! Implements the narrow `MarketDataProvider` surface over a REST vendor,
//! with a sliding-window rate limiter shared across all callers and bounded
//! retry with exponential backoff on 429s. The per-provider throttle lives
//! here, not in the batch workers, so total call volume stays capped no
//! matter how many workers fan out.

mod cache;

pub use cache::CachedMarketData;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use prediction_core::{
    Bar, DataWindowSpec, EventCalendarProvider, EventRecord, EventSource, EventType,
    MarketDataProvider, PredictionError,
};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_SECS: u64 = 1;

/// Sliding-window rate limiter: at most `max_requests` per `window`.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests,
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }

            let wait_until = *ts.front().expect("non-empty when at capacity") + self.window;
            let sleep_dur = wait_until.duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!(
                "rate limiter: waiting {:.1}s for a market-data slot",
                sleep_dur.as_secs_f64()
            );
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    #[serde(default)]
    bars: Vec<ApiBar>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: f64,
}

#[derive(Debug, Deserialize)]
struct CloseResponse {
    close: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiEvent {
    event_type: String,
    date: NaiveDate,
    title: String,
    confidence: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<ApiEvent>,
}

#[derive(Clone)]
pub struct MarketDataClient {
    base_url: String,
    api_key: String,
    client: Client,
    rate_limiter: RateLimiter,
}

impl MarketDataClient {
    /// `calls_per_minute` is the vendor-facing cap, independent of how many
    /// batch workers share this client.
    pub fn new(base_url: String, api_key: String, calls_per_minute: usize) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            base_url,
            api_key,
            client,
            rate_limiter: RateLimiter::new(calls_per_minute, Duration::from_secs(60)),
        }
    }

    /// GET with rate limiting and bounded 429 retry (exponential backoff).
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, PredictionError> {
        for attempt in 0..RETRY_ATTEMPTS {
            self.rate_limiter.acquire().await;

            let response = self
                .client
                .get(url)
                .query(&[("apiKey", self.api_key.as_str())])
                .send()
                .await
                .map_err(|e| {
                    PredictionError::ProviderUnavailable(format!("market data: {}", e))
                })?;

            let status = response.status();
            if status.as_u16() == 429 {
                let wait = RETRY_BASE_SECS << attempt;
                tracing::warn!(
                    "market data 429, waiting {}s before retry {}/{}",
                    wait,
                    attempt + 1,
                    RETRY_ATTEMPTS
                );
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }

            if status.as_u16() == 404 {
                return Err(PredictionError::NoDataAvailable(format!(
                    "market data: HTTP 404 for {}",
                    url
                )));
            }

            if !status.is_success() {
                return Err(PredictionError::ProviderUnavailable(format!(
                    "market data: HTTP {}",
                    status
                )));
            }

            return response.json::<T>().await.map_err(|e| {
                PredictionError::ProviderUnavailable(format!("bad market data response: {}", e))
            });
        }

        Err(PredictionError::RateLimitExceeded(format!(
            "market data still throttled after {} attempts",
            RETRY_ATTEMPTS
        )))
    }
}

#[async_trait]
impl MarketDataProvider for MarketDataClient {
    async fn history(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<Vec<Bar>, PredictionError> {
        // The window anchor, not wall-clock now, bounds the series: racing
        // generators for the same key must see identical inputs.
        let to = window.anchor;
        let from = to - ChronoDuration::days(window.lookback_days);
        let url = format!(
            "{}/v1/bars/{}?interval={}&from={}&to={}",
            self.base_url,
            symbol.to_uppercase(),
            window.interval,
            from.format("%Y-%m-%dT%H:%M:%SZ"),
            to.format("%Y-%m-%dT%H:%M:%SZ"),
        );

        let response: BarsResponse = self.get_json(&url).await?;
        if response.bars.is_empty() {
            return Err(PredictionError::NoDataAvailable(format!(
                "no bars for {} in window",
                symbol
            )));
        }

        let mut bars: Vec<Bar> = response
            .bars
            .into_iter()
            .filter_map(|b| {
                chrono::DateTime::from_timestamp_millis(b.t).map(|timestamp| Bar {
                    timestamp,
                    open: b.o,
                    high: b.h,
                    low: b.l,
                    close: b.c,
                    volume: b.v,
                })
            })
            // Bars after the anchor would leak future data into generation
            .filter(|b| b.timestamp <= to)
            .collect();
        bars.sort_by_key(|b| b.timestamp);

        Ok(bars)
    }

    async fn quote(&self, symbol: &str) -> Result<f64, PredictionError> {
        let url = format!("{}/v1/quote/{}", self.base_url, symbol.to_uppercase());
        let response: QuoteResponse = self.get_json(&url).await?;
        Ok(response.price)
    }

    async fn closing_price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<f64, PredictionError> {
        let url = format!(
            "{}/v1/close/{}/{}",
            self.base_url,
            symbol.to_uppercase(),
            date.format("%Y-%m-%d")
        );
        let response: CloseResponse = self.get_json(&url).await?;

        // Market holidays and delistings come back with no close; the
        // validator retries on the next run rather than guessing.
        response.close.ok_or_else(|| {
            PredictionError::NoDataAvailable(format!("no close for {} on {}", symbol, date))
        })
    }
}

/// The same vendor serves the corporate event calendar. An empty array is a
/// quiet symbol, not an error.
#[async_trait]
impl EventCalendarProvider for MarketDataClient {
    async fn upcoming_events(
        &self,
        symbol: &str,
        horizon_days: i64,
    ) -> Result<Vec<EventRecord>, PredictionError> {
        let url = format!(
            "{}/v1/events/{}?horizon_days={}",
            self.base_url,
            symbol.to_uppercase(),
            horizon_days
        );
        let response: EventsResponse = self.get_json(&url).await?;

        Ok(response
            .events
            .into_iter()
            .map(|e| EventRecord {
                symbol: symbol.to_uppercase(),
                event_type: match e.event_type.as_str() {
                    "earnings" => EventType::Earnings,
                    "dividend-ex-date" => EventType::DividendExDate,
                    "regulatory-disclosure" => EventType::RegulatoryDisclosure,
                    other => EventType::Other(other.to_string()),
                },
                date: e.date,
                title: e.title,
                source: EventSource::Feed,
                date_confidence: e.confidence.unwrap_or(1.0).clamp(0.0, 1.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rate_limiter_admits_up_to_capacity_immediately() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limiter_delays_the_overflow_call() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));

        limiter.acquire().await;
        limiter.acquire().await;

        let start = Instant::now();
        limiter.acquire().await;
        // Third call had to wait for the window to roll
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[test]
    fn history_url_is_anchored_to_the_window() {
        let anchor = "2025-03-04T14:30:00Z"
            .parse::<chrono::DateTime<chrono::Utc>>()
            .unwrap();
        let window = DataWindowSpec {
            interval: "1d".to_string(),
            lookback_days: 90,
            anchor,
        };

        let to = window.anchor;
        let from = to - ChronoDuration::days(window.lookback_days);
        assert_eq!(from.format("%Y-%m-%d").to_string(), "2024-12-04");
        assert_eq!(to.format("%Y-%m-%d").to_string(), "2025-03-04");
    }
}
