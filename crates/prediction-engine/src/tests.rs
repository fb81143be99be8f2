use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use ensemble_combiner::EnsembleCombiner;
use event_risk_guard::{MergedEventCalendar, RiskGuard};
use prediction_core::{
    Bar, DataWindowSpec, Direction, EnsembleConfig, MarketDataProvider, PredictionError,
    PredictionKey, RecordState, RiskGuardConfig, SignalProvider, SignalSnapshot, Timeframe,
};
use prediction_store::PredictionStore;

use crate::PredictionEngine;

async fn setup_store() -> PredictionStore {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");

    let store = PredictionStore::new(pool);
    store.init_schema().await.unwrap();
    store
}

struct CountingMarketData {
    history_calls: AtomicU64,
}

#[async_trait]
impl MarketDataProvider for CountingMarketData {
    async fn history(
        &self,
        _symbol: &str,
        _window: &DataWindowSpec,
    ) -> Result<Vec<Bar>, PredictionError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        Ok((0..40)
            .map(|i| Bar {
                timestamp: Utc::now() - Duration::days(40 - i),
                open: 100.0,
                high: 100.0,
                low: 100.0,
                close: 100.0,
                volume: 1_000_000.0,
            })
            .collect())
    }

    async fn quote(&self, _symbol: &str) -> Result<f64, PredictionError> {
        Ok(100.0)
    }

    async fn closing_price(
        &self,
        _symbol: &str,
        _date: chrono::NaiveDate,
    ) -> Result<f64, PredictionError> {
        Ok(100.0)
    }
}

struct CountingProvider {
    id: &'static str,
    direction: Direction,
    confidence: f64,
    calls: AtomicU64,
}

impl CountingProvider {
    fn new(id: &'static str, direction: Direction, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            id,
            direction,
            confidence,
            calls: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl SignalProvider for CountingProvider {
    fn provider_id(&self) -> &str {
        self.id
    }

    async fn predict(
        &self,
        _symbol: &str,
        _window: &DataWindowSpec,
    ) -> Result<SignalSnapshot, PredictionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SignalSnapshot {
            provider_id: self.id.to_string(),
            direction: self.direction,
            confidence: self.confidence,
        })
    }
}

struct Fixture {
    engine: Arc<PredictionEngine>,
    market_data: Arc<CountingMarketData>,
    providers: Vec<Arc<CountingProvider>>,
}

async fn fixture() -> Fixture {
    let store = setup_store().await;
    let market_data = Arc::new(CountingMarketData {
        history_calls: AtomicU64::new(0),
    });

    let providers = vec![
        CountingProvider::new("a", Direction::Buy, 70.0),
        CountingProvider::new("b", Direction::Buy, 60.0),
        CountingProvider::new("c", Direction::Sell, 55.0),
    ];

    let config = EnsembleConfig {
        weights: [("a", 0.45), ("b", 0.25), ("c", 0.30)]
            .into_iter()
            .map(|(id, w)| (id.to_string(), w))
            .collect(),
        ..Default::default()
    };
    let combiner = EnsembleCombiner::new(config).unwrap();

    let guard = RiskGuard::new(
        RiskGuardConfig::default(),
        Arc::new(MergedEventCalendar::new(None)),
    )
    .unwrap();

    let engine = Arc::new(PredictionEngine::new(
        store,
        market_data.clone(),
        providers
            .iter()
            .map(|p| p.clone() as Arc<dyn SignalProvider>)
            .collect(),
        combiner,
        guard,
    ));

    Fixture {
        engine,
        market_data,
        providers,
    }
}

fn as_of() -> DateTime<Utc> {
    "2025-03-04T14:30:00Z".parse().unwrap()
}

#[tokio::test]
async fn second_call_is_a_cache_hit_with_zero_provider_calls() {
    let fx = fixture().await;

    let first = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    let second = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();

    assert_eq!(first.direction, Direction::Buy);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(first.confidence, second.confidence);

    for provider in &fx.providers {
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
    // One generation: symbol history + benchmark history
    assert_eq!(fx.market_data.history_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fifty_concurrent_callers_share_one_generation() {
    let fx = fixture().await;

    let mut handles = Vec::new();
    for _ in 0..50 {
        let engine = fx.engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
                .await
                .unwrap()
        }));
    }

    let mut records = Vec::new();
    for handle in handles {
        records.push(handle.await.unwrap());
    }

    let first = &records[0];
    for record in &records {
        assert_eq!(record.created_at, first.created_at);
        assert_eq!(record.confidence, first.confidence);
        assert_eq!(record.direction, first.direction);
    }

    for provider in &fx.providers {
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }
    assert_eq!(fx.market_data.history_calls.load(Ordering::SeqCst), 2);
    // Once every caller is done the per-key lock is gone too
    assert_eq!(fx.engine.key_lock_count(), 0);
}

#[tokio::test]
async fn key_lock_is_released_after_generation() {
    let fx = fixture().await;

    fx.engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    assert_eq!(fx.engine.key_lock_count(), 0);

    fx.engine
        .get_or_create("MSFT", Timeframe::Weekly, as_of())
        .await
        .unwrap();
    assert_eq!(fx.engine.key_lock_count(), 0);

    // Cache hits never touch the lock map
    fx.engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    assert_eq!(fx.engine.key_lock_count(), 0);
}

#[tokio::test]
async fn keys_differ_by_timeframe() {
    let fx = fixture().await;

    let eod = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    let weekly = fx
        .engine
        .get_or_create("AAPL", Timeframe::Weekly, as_of())
        .await
        .unwrap();

    assert_eq!(eod.timeframe, Timeframe::EndOfDay);
    assert_eq!(weekly.timeframe, Timeframe::Weekly);
    assert!(weekly.target_time > eod.target_time);
}

#[tokio::test]
async fn validation_before_target_time_is_pending() {
    let fx = fixture().await;

    let record = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    let key = record.key();

    // Still mid-session: target is 21:00 UTC
    let too_early = "2025-03-04T15:00:00Z".parse().unwrap();
    let result = fx.engine.validate_outcome(&key, 101.0, too_early).await;
    assert!(matches!(result, Err(PredictionError::ValidationPending)));
}

#[tokio::test]
async fn validation_completes_once_and_is_idempotent() {
    let fx = fixture().await;

    let record = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    let key = record.key();
    let actual = record.predicted_price * 1.015;

    let after_close = "2025-03-05T09:00:00Z".parse().unwrap();
    let completed = fx
        .engine
        .validate_outcome(&key, actual, after_close)
        .await
        .unwrap();

    assert_eq!(completed.state, RecordState::Completed);
    assert_eq!(completed.actual_price, Some(actual));
    // 1.5% error within the 2% tolerance
    assert_eq!(completed.correct, Some(true));
    assert!((completed.error_pct.unwrap() - 0.015).abs() < 1e-9);

    // Second pass, different price: no-op, the first outcome stands
    let later = "2025-03-06T09:00:00Z".parse().unwrap();
    let again = fx.engine.validate_outcome(&key, 50.0, later).await.unwrap();
    assert_eq!(again.actual_price, Some(actual));
    assert_eq!(again.validated_at, completed.validated_at);
}

#[tokio::test]
async fn invalidate_frees_the_key_for_regeneration() {
    let fx = fixture().await;

    let record = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    let key = record.key();

    assert!(fx.engine.invalidate(&key).await.unwrap());
    // Second invalidate finds nothing live
    assert!(!fx.engine.invalidate(&key).await.unwrap());

    let regenerated = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    assert_eq!(regenerated.state, RecordState::Active);

    // A fresh generation ran
    for provider in &fx.providers {
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }
}

#[tokio::test]
async fn hold_projects_no_price_move() {
    let store = setup_store().await;
    let market_data = Arc::new(CountingMarketData {
        history_calls: AtomicU64::new(0),
    });

    // Exact tie: equal weights, opposite calls
    let providers: Vec<Arc<dyn SignalProvider>> = vec![
        CountingProvider::new("a", Direction::Buy, 80.0),
        CountingProvider::new("b", Direction::Sell, 80.0),
    ];
    let config = EnsembleConfig {
        weights: [("a", 0.5), ("b", 0.5)]
            .into_iter()
            .map(|(id, w)| (id.to_string(), w))
            .collect(),
        ..Default::default()
    };
    let engine = PredictionEngine::new(
        store,
        market_data,
        providers,
        EnsembleCombiner::new(config).unwrap(),
        RiskGuard::new(
            RiskGuardConfig::default(),
            Arc::new(MergedEventCalendar::new(None)),
        )
        .unwrap(),
    );

    let record = engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();

    assert_eq!(record.direction, Direction::Hold);
    assert_eq!(record.predicted_change_pct, 0.0);
    assert_eq!(record.predicted_price, record.current_price);
    assert!(record.confidence <= 60.0);
}

#[tokio::test]
async fn key_is_case_insensitive_on_symbol() {
    let fx = fixture().await;

    let lower = fx
        .engine
        .get_or_create("aapl", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();
    let upper = fx
        .engine
        .get_or_create("AAPL", Timeframe::EndOfDay, as_of())
        .await
        .unwrap();

    assert_eq!(lower.symbol, "AAPL");
    assert_eq!(lower.created_at, upper.created_at);
    assert_eq!(
        PredictionKey::new("aapl", as_of().date_naive(), Timeframe::EndOfDay).cache_key(),
        "AAPL:2025-03-04:eod"
    );
}
