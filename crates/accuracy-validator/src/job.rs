use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use prediction_core::{MarketDataProvider, Timeframe, ValidatorConfig};
use prediction_store::{OutcomeUpdate, PredictionStore};

use crate::stats::{AccuracyStats, AccuracyStatsStore};

/// Rollup windows recomputed for every touched (symbol, timeframe)
const PERIODS: [(&str, i64); 2] = [("30d", 30), ("all", 3650)];

/// Summary of one validation pass
#[derive(Debug, Default)]
pub struct ValidationRun {
    pub due: usize,
    pub completed: usize,
    /// Close unavailable; record left ACTIVE for the next run
    pub deferred: usize,
    /// Lost the completion race to a concurrent pass
    pub already_done: usize,
}

/// Single-threaded validation job. Safe to run alongside generation: it only
/// touches ACTIVE records past their target time, and the store's
/// state-guarded update makes the ACTIVE -> COMPLETED transition happen at
/// most once however many passes overlap.
pub struct AccuracyValidator {
    store: PredictionStore,
    stats: AccuracyStatsStore,
    market_data: Arc<dyn MarketDataProvider>,
    config: ValidatorConfig,
}

impl AccuracyValidator {
    pub fn new(
        store: PredictionStore,
        stats: AccuracyStatsStore,
        market_data: Arc<dyn MarketDataProvider>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            store,
            stats,
            market_data,
            config,
        }
    }

    pub fn stats_store(&self) -> &AccuracyStatsStore {
        &self.stats
    }

    /// Validate every due record, then recompute stats for the pairs that
    /// gained an outcome. Re-running with the same `now` is a no-op.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<ValidationRun> {
        let due = self.store.active_due(now).await?;
        let mut run = ValidationRun {
            due: due.len(),
            ..Default::default()
        };
        let mut touched: HashSet<(String, Timeframe)> = HashSet::new();

        for record in due {
            let key = record.key();
            let close_date = record.target_time.date_naive();

            let actual_price = match self
                .market_data
                .closing_price(&record.symbol, close_date)
                .await
            {
                Ok(price) => price,
                Err(e) => {
                    tracing::warn!(
                        "close for {} on {} unavailable, deferring: {}",
                        record.symbol,
                        close_date,
                        e
                    );
                    run.deferred += 1;
                    continue;
                }
            };

            let (error_pct, correct) = self.config.judge(record.predicted_price, actual_price);
            let outcome = OutcomeUpdate {
                actual_price,
                error_pct,
                correct,
                validated_at: now,
            };

            if self.store.complete(&key, &outcome).await? {
                tracing::info!(
                    "{}: predicted {:.2}, actual {:.2}, error {:.2}% -> {}",
                    key.cache_key(),
                    record.predicted_price,
                    actual_price,
                    error_pct * 100.0,
                    if correct { "correct" } else { "incorrect" }
                );
                run.completed += 1;
                touched.insert((record.symbol.clone(), record.timeframe));
            } else {
                run.already_done += 1;
            }
        }

        for (symbol, timeframe) in touched {
            self.recompute(&symbol, timeframe, now).await?;
        }

        tracing::info!(
            "validation pass: {} due, {} completed, {} deferred",
            run.due,
            run.completed,
            run.deferred
        );
        Ok(run)
    }

    /// Recompute the rollup rows for one (symbol, timeframe) from completed
    /// records. Incremental in the sense that only touched pairs are redone;
    /// the rollup itself is always derived fresh from the records.
    async fn recompute(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        now: DateTime<Utc>,
    ) -> Result<()> {
        for (period, days) in PERIODS {
            let since = now.date_naive() - Duration::days(days);
            let records = self.store.completed_for(symbol, timeframe, since).await?;
            let stats = AccuracyStats::from_records(symbol, timeframe, period, &records);
            self.stats.upsert(&stats).await?;
        }
        Ok(())
    }
}
