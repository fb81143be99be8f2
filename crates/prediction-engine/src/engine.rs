use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use ensemble_combiner::EnsembleCombiner;
use event_risk_guard::RiskGuard;
use prediction_core::{
    Direction, MarketDataProvider, PredictionError, PredictionKey, PredictionRecord, RecordState,
    SignalProvider, SignalSnapshot, Timeframe, ValidatorConfig,
};
use prediction_store::{OutcomeUpdate, PredictionStore};
use signal_providers::participation_from_bars;

const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the prediction lifecycle: at most one generation per
/// (symbol, prediction_date, timeframe), outcome writes only through
/// `validate_outcome`, invalidation only on explicit admin request.
///
/// Two layers enforce the at-most-once guarantee. A per-key async lock
/// serializes generators inside this process so the expensive provider
/// fan-out runs once; the store's `put_if_absent` settles races with other
/// processes. The lock is held only for generation, never across a cache hit.
pub struct PredictionEngine {
    store: PredictionStore,
    market_data: Arc<dyn MarketDataProvider>,
    providers: Vec<Arc<dyn SignalProvider>>,
    combiner: EnsembleCombiner,
    guard: RiskGuard,
    validator_config: ValidatorConfig,
    key_locks: DashMap<String, Arc<Mutex<()>>>,
    provider_timeout: Duration,
}

impl PredictionEngine {
    pub fn new(
        store: PredictionStore,
        market_data: Arc<dyn MarketDataProvider>,
        providers: Vec<Arc<dyn SignalProvider>>,
        combiner: EnsembleCombiner,
        guard: RiskGuard,
    ) -> Self {
        Self {
            store,
            market_data,
            providers,
            combiner,
            guard,
            validator_config: ValidatorConfig::default(),
            key_locks: DashMap::new(),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_validator_config(mut self, config: ValidatorConfig) -> Self {
        self.validator_config = config;
        self
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn store(&self) -> &PredictionStore {
        &self.store
    }

    /// Return the cached record for (symbol, as_of date, timeframe),
    /// generating it first if no record exists.
    ///
    /// A hit (ACTIVE or COMPLETED) returns the stored record unchanged with
    /// zero provider calls. `as_of` anchors the data window, so two callers
    /// racing on the same key compute identical inputs; whichever loses the
    /// insert race returns the winner's record.
    pub async fn get_or_create(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        as_of: DateTime<Utc>,
    ) -> Result<PredictionRecord, PredictionError> {
        let key = PredictionKey::new(symbol, as_of.date_naive(), timeframe);

        if let Some(existing) = self.get(&key).await? {
            tracing::debug!("cache hit for {}", key.cache_key());
            return Ok(existing);
        }

        let lock = self
            .key_locks
            .entry(key.cache_key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _held = lock.lock().await;
            self.create_under_lock(&key, as_of).await
        };

        // Retire the lock entry once no other caller still holds it, so the
        // map does not grow by one entry per key for the life of the process
        drop(lock);
        self.key_locks
            .remove_if(&key.cache_key(), |_, lock| Arc::strong_count(lock) == 1);

        result
    }

    async fn create_under_lock(
        &self,
        key: &PredictionKey,
        as_of: DateTime<Utc>,
    ) -> Result<PredictionRecord, PredictionError> {
        // Double-checked: another task may have generated while we waited
        if let Some(existing) = self.get(key).await? {
            tracing::debug!("cache hit for {} after lock", key.cache_key());
            return Ok(existing);
        }

        let record = self.generate(key, as_of).await?;

        let inserted = self
            .store
            .put_if_absent(&record)
            .await
            .map_err(|e| PredictionError::StoreError(e.to_string()))?;
        if inserted {
            tracing::info!(
                "generated {}: {} {:.1}% confidence (risk {:.2})",
                key.cache_key(),
                record.direction.as_str(),
                record.confidence,
                record.risk_score
            );
            return Ok(record);
        }

        // Another process won the insert; its record is authoritative
        self.get(key).await?.ok_or_else(|| {
            PredictionError::PersistenceConflict(format!(
                "insert for {} conflicted but no record is readable",
                key.cache_key()
            ))
        })
    }

    #[cfg(test)]
    pub(crate) fn key_lock_count(&self) -> usize {
        self.key_locks.len()
    }

    /// Write the realized outcome and flip ACTIVE -> COMPLETED.
    ///
    /// Idempotent: a COMPLETED record is returned as-is, and the underlying
    /// update is guarded on state so concurrent validators cannot double-
    /// write. Before `target_time` this is `ValidationPending`, not an error
    /// worth alarming on.
    pub async fn validate_outcome(
        &self,
        key: &PredictionKey,
        actual_price: f64,
        now: DateTime<Utc>,
    ) -> Result<PredictionRecord, PredictionError> {
        let record = self.get(key).await?.ok_or_else(|| {
            PredictionError::NoDataAvailable(format!("no record for {}", key.cache_key()))
        })?;

        if record.state == RecordState::Completed {
            return Ok(record);
        }
        if now < record.target_time {
            return Err(PredictionError::ValidationPending);
        }

        let (error_pct, correct) = self
            .validator_config
            .judge(record.predicted_price, actual_price);
        let outcome = OutcomeUpdate {
            actual_price,
            error_pct,
            correct,
            validated_at: now,
        };

        let transitioned = self
            .store
            .complete(key, &outcome)
            .await
            .map_err(|e| PredictionError::StoreError(e.to_string()))?;
        if !transitioned {
            tracing::debug!("{} was validated by another pass", key.cache_key());
        }

        self.get(key).await?.ok_or_else(|| {
            PredictionError::StoreError(format!(
                "record for {} vanished during validation",
                key.cache_key()
            ))
        })
    }

    /// Admin-only: retire the live record for a key so a fresh generation
    /// can replace it. Never called automatically.
    pub async fn invalidate(&self, key: &PredictionKey) -> Result<bool, PredictionError> {
        let invalidated = self
            .store
            .invalidate(key)
            .await
            .map_err(|e| PredictionError::StoreError(e.to_string()))?;
        if invalidated {
            tracing::warn!("record {} invalidated by admin request", key.cache_key());
        }
        Ok(invalidated)
    }

    async fn get(&self, key: &PredictionKey) -> Result<Option<PredictionRecord>, PredictionError> {
        self.store
            .get(key)
            .await
            .map_err(|e| PredictionError::StoreError(e.to_string()))
    }

    async fn generate(
        &self,
        key: &PredictionKey,
        as_of: DateTime<Utc>,
    ) -> Result<PredictionRecord, PredictionError> {
        let window = key.timeframe.default_window(as_of);

        let bars = self.market_data.history(&key.symbol, &window).await?;
        let current_price = bars.last().map(|b| b.close).ok_or_else(|| {
            PredictionError::NoDataAvailable(format!("no price history for {}", key.symbol))
        })?;

        // Benchmark history is for beta only; its absence degrades the risk
        // assessment, never the prediction.
        let benchmark = self.guard.config().benchmark_symbol.clone();
        let benchmark_bars = match self.market_data.history(&benchmark, &window).await {
            Ok(bars) => bars,
            Err(e) => {
                tracing::warn!("benchmark {} history unavailable: {}", benchmark, e);
                Vec::new()
            }
        };

        let risk = self
            .guard
            .assess(&key.symbol, as_of, &bars, &benchmark_bars)
            .await;

        let snapshots = self.collect_snapshots(&key.symbol, &window).await;
        let participation = participation_from_bars(&bars);

        let outcome = self.combiner.combine(&snapshots, participation, &risk)?;

        let predicted_change_pct = self.projected_change_pct(
            outcome.direction,
            outcome.confidence,
            key.timeframe,
        );
        let predicted_price = current_price * (1.0 + predicted_change_pct / 100.0);

        Ok(PredictionRecord {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            prediction_date: key.prediction_date,
            target_time: key.timeframe.target_time(as_of),
            current_price,
            data_window: window,
            component_breakdown: outcome.votes,
            direction: outcome.direction,
            predicted_price,
            predicted_change_pct,
            confidence: outcome.confidence,
            risk_score: risk.risk_score,
            weight_haircut_applied: risk.haircut,
            forced_hold: risk.forced_hold,
            risk_reason: risk.reason,
            actual_price: None,
            error_pct: None,
            correct: None,
            validated_at: None,
            state: RecordState::Active,
            created_at: Utc::now(),
        })
    }

    /// Fan out to every available provider concurrently, each bounded by
    /// the provider timeout. Failures and timeouts drop the provider's vote;
    /// the combiner renormalizes around the survivors.
    async fn collect_snapshots(
        &self,
        symbol: &str,
        window: &prediction_core::DataWindowSpec,
    ) -> Vec<SignalSnapshot> {
        let mut set = tokio::task::JoinSet::new();
        for provider in &self.providers {
            if !provider.available() {
                tracing::debug!("provider {} reports unavailable", provider.provider_id());
                continue;
            }
            let provider = provider.clone();
            let symbol = symbol.to_string();
            let window = window.clone();
            let timeout = self.provider_timeout;
            set.spawn(async move {
                let id = provider.provider_id().to_string();
                match tokio::time::timeout(timeout, provider.predict(&symbol, &window)).await {
                    Ok(Ok(snapshot)) => Some(snapshot),
                    Ok(Err(e)) => {
                        tracing::warn!("provider {} dropped for {}: {}", id, symbol, e);
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            "provider {} timed out after {:?} for {}",
                            id,
                            timeout,
                            symbol
                        );
                        None
                    }
                }
            });
        }

        let mut snapshots = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(Some(snapshot)) => snapshots.push(snapshot),
                Ok(None) => {}
                Err(e) => tracing::warn!("provider task panicked: {}", e),
            }
        }
        snapshots
    }

    /// Map the directional call into an expected move. Conviction above the
    /// confidence floor scales a per-timeframe base move; a HOLD projects no
    /// move at all.
    fn projected_change_pct(
        &self,
        direction: Direction,
        confidence: f64,
        timeframe: Timeframe,
    ) -> f64 {
        let sign = match direction {
            Direction::Buy => 1.0,
            Direction::Sell => -1.0,
            Direction::Hold => return 0.0,
        };

        let base_move_pct = match timeframe {
            Timeframe::EndOfDay => 1.0,
            Timeframe::Weekly => 2.5,
            Timeframe::IntradayHour => 0.3,
        };

        let floor = self.combiner.config().confidence_floor;
        let ceiling = self.combiner.config().confidence_ceiling;
        let conviction = ((confidence - floor) / (ceiling - floor)).clamp(0.0, 1.0);

        sign * conviction * base_move_pct
    }
}
