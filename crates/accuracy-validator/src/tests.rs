use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use prediction_core::{
    Bar, ComponentVote, DataWindowSpec, Direction, MarketDataProvider, PredictionError,
    PredictionRecord, RecordState, Timeframe, ValidatorConfig,
};
use prediction_store::PredictionStore;

use crate::{AccuracyStats, AccuracyStatsStore, AccuracyValidator};

async fn setup() -> (PredictionStore, AccuracyStatsStore) {
    sqlx::any::install_default_drivers();
    let pool = sqlx::any::AnyPoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory SQLite");

    let store = PredictionStore::new(pool.clone());
    store.init_schema().await.unwrap();
    let stats = AccuracyStatsStore::new(pool);
    stats.init_schema().await.unwrap();
    (store, stats)
}

/// Fixed close, optionally failing to simulate a feed outage.
struct FixedClose {
    price: f64,
    failing: AtomicBool,
}

impl FixedClose {
    fn new(price: f64) -> Arc<Self> {
        Arc::new(Self {
            price,
            failing: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl MarketDataProvider for FixedClose {
    async fn history(
        &self,
        _symbol: &str,
        _window: &DataWindowSpec,
    ) -> Result<Vec<Bar>, PredictionError> {
        Ok(Vec::new())
    }

    async fn quote(&self, _symbol: &str) -> Result<f64, PredictionError> {
        Ok(self.price)
    }

    async fn closing_price(
        &self,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<f64, PredictionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PredictionError::NoDataAvailable(format!(
                "no close for {} on {}",
                symbol, date
            )));
        }
        Ok(self.price)
    }
}

fn active_record(symbol: &str, predicted: f64, confidence: f64) -> PredictionRecord {
    let date = NaiveDate::from_ymd_opt(2025, 3, 4).unwrap();
    let as_of = date.and_hms_opt(14, 30, 0).unwrap().and_utc();
    PredictionRecord {
        symbol: symbol.to_string(),
        timeframe: Timeframe::EndOfDay,
        prediction_date: date,
        target_time: Timeframe::EndOfDay.target_time(as_of),
        current_price: 100.0,
        data_window: DataWindowSpec {
            interval: "1d".to_string(),
            lookback_days: 90,
            anchor: as_of,
        },
        component_breakdown: vec![ComponentVote {
            provider_id: "momentum".to_string(),
            direction: Direction::Buy,
            confidence,
            nominal_weight: 1.0,
            applied_weight: 1.0,
        }],
        direction: Direction::Buy,
        predicted_price: predicted,
        predicted_change_pct: 1.0,
        confidence,
        risk_score: 0.0,
        weight_haircut_applied: 0.0,
        forced_hold: false,
        risk_reason: "no elevated risk signals".to_string(),
        actual_price: None,
        error_pct: None,
        correct: None,
        validated_at: None,
        state: RecordState::Active,
        created_at: as_of,
    }
}

fn after_close() -> DateTime<Utc> {
    "2025-03-05T09:00:00Z".parse().unwrap()
}

#[tokio::test]
async fn close_within_tolerance_marks_correct() {
    let (store, stats) = setup().await;
    store
        .put_if_absent(&active_record("AAPL", 100.0, 68.0))
        .await
        .unwrap();

    // Predicted 100.00, realized 101.50: 1.5% error, inside 2% tolerance
    let validator = AccuracyValidator::new(
        store.clone(),
        stats,
        FixedClose::new(101.50),
        ValidatorConfig::default(),
    );
    let run = validator.run(after_close()).await.unwrap();

    assert_eq!(run.due, 1);
    assert_eq!(run.completed, 1);

    let record = store
        .get(&active_record("AAPL", 100.0, 68.0).key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, RecordState::Completed);
    assert_eq!(record.actual_price, Some(101.50));
    assert_eq!(record.correct, Some(true));
    assert!((record.error_pct.unwrap() - 0.015).abs() < 1e-9);
}

#[tokio::test]
async fn close_outside_tolerance_marks_incorrect() {
    let (store, stats) = setup().await;
    store
        .put_if_absent(&active_record("AAPL", 100.0, 68.0))
        .await
        .unwrap();

    let validator = AccuracyValidator::new(
        store.clone(),
        stats,
        FixedClose::new(104.0),
        ValidatorConfig::default(),
    );
    validator.run(after_close()).await.unwrap();

    let record = store
        .get(&active_record("AAPL", 100.0, 68.0).key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.correct, Some(false));
}

#[tokio::test]
async fn fetch_failure_defers_instead_of_judging() {
    let (store, stats) = setup().await;
    store
        .put_if_absent(&active_record("AAPL", 100.0, 68.0))
        .await
        .unwrap();

    let market_data = FixedClose::new(101.0);
    market_data.failing.store(true, Ordering::SeqCst);
    let validator = AccuracyValidator::new(
        store.clone(),
        stats,
        market_data.clone(),
        ValidatorConfig::default(),
    );

    let run = validator.run(after_close()).await.unwrap();
    assert_eq!(run.deferred, 1);
    assert_eq!(run.completed, 0);

    // Still ACTIVE, never marked incorrect for a feed outage
    let record = store
        .get(&active_record("AAPL", 100.0, 68.0).key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.state, RecordState::Active);
    assert_eq!(record.correct, None);

    // Feed recovers: the next pass completes the record
    market_data.failing.store(false, Ordering::SeqCst);
    let run = validator.run(after_close()).await.unwrap();
    assert_eq!(run.completed, 1);
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let (store, stats) = setup().await;
    store
        .put_if_absent(&active_record("AAPL", 100.0, 68.0))
        .await
        .unwrap();

    let validator = AccuracyValidator::new(
        store,
        stats,
        FixedClose::new(101.0),
        ValidatorConfig::default(),
    );

    let first = validator.run(after_close()).await.unwrap();
    assert_eq!(first.completed, 1);

    let second = validator.run(after_close()).await.unwrap();
    assert_eq!(second.due, 0);
    assert_eq!(second.completed, 0);
}

#[tokio::test]
async fn stats_rollup_lands_in_the_right_bucket() {
    let (store, stats) = setup().await;
    store
        .put_if_absent(&active_record("AAPL", 100.0, 68.0))
        .await
        .unwrap();

    let validator = AccuracyValidator::new(
        store,
        stats.clone(),
        FixedClose::new(101.0),
        ValidatorConfig::default(),
    );
    validator.run(after_close()).await.unwrap();

    let rollup = stats
        .get("AAPL", Timeframe::EndOfDay, "30d")
        .await
        .unwrap()
        .expect("stats row written");

    assert_eq!(rollup.total, 1);
    assert_eq!(rollup.correct, 1);
    assert_eq!(rollup.accuracy_pct(), Some(100.0));
    assert!((rollup.mean_abs_error_pct - 0.01).abs() < 1e-9);

    let bucket = rollup
        .calibration
        .iter()
        .find(|b| b.lo == 60.0)
        .expect("60-70 bucket");
    assert_eq!(bucket.total, 1);
    assert_eq!(bucket.correct, 1);

    assert_eq!(rollup.direction_stats(Direction::Buy).total, 1);
    assert_eq!(rollup.direction_stats(Direction::Sell).total, 0);
}

#[test]
fn from_records_splits_by_direction() {
    let mut records = Vec::new();
    for (direction, correct) in [
        (Direction::Buy, true),
        (Direction::Buy, true),
        (Direction::Buy, false),
        (Direction::Sell, true),
    ] {
        let mut record = active_record("MSFT", 100.0, 72.0);
        record.direction = direction;
        record.state = RecordState::Completed;
        record.correct = Some(correct);
        record.error_pct = Some(if correct { 0.01 } else { 0.05 });
        records.push(record);
    }

    let stats = AccuracyStats::from_records("MSFT", Timeframe::EndOfDay, "all", &records);

    assert_eq!(stats.total, 4);
    assert_eq!(stats.correct, 3);
    let buy = stats.direction_stats(Direction::Buy);
    assert_eq!((buy.total, buy.correct), (3, 2));
    assert_eq!(stats.direction_stats(Direction::Sell).accuracy_pct(), Some(100.0));
}
