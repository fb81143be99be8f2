use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::PredictionError;
use crate::types::{Bar, DataWindowSpec, EventRecord, SentimentAggregate, SignalSnapshot};

/// Uniform interface over heterogeneous prediction sources (sequence
/// forecaster, momentum heuristic, indicator voter, sentiment bridge).
///
/// Absence is a first-class state: an unreachable provider returns
/// `ProviderUnavailable` and the combiner renormalizes around it. It is
/// never treated as a zero-confidence vote.
#[async_trait]
pub trait SignalProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    /// Cheap capability probe; providers backed by optional services report
    /// `false` instead of failing every predict call.
    fn available(&self) -> bool {
        true
    }

    async fn predict(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<SignalSnapshot, PredictionError>;
}

/// Rolling news/social sentiment for a symbol. Zero articles is a valid
/// answer; fabricated data is not.
#[async_trait]
pub trait SentimentProvider: Send + Sync {
    async fn analyze(
        &self,
        symbol: &str,
        window_hours: i64,
    ) -> Result<SentimentAggregate, PredictionError>;
}

/// Narrow market-data surface the core depends on
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    async fn history(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<Vec<Bar>, PredictionError>;

    async fn quote(&self, symbol: &str) -> Result<f64, PredictionError>;

    async fn closing_price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<f64, PredictionError>;
}

/// Upcoming corporate/regulatory events for a symbol
#[async_trait]
pub trait EventCalendarProvider: Send + Sync {
    async fn upcoming_events(
        &self,
        symbol: &str,
        horizon_days: i64,
    ) -> Result<Vec<EventRecord>, PredictionError>;
}
