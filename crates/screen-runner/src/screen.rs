use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;

use opportunity_ranker::{rank, Opportunity, RankingWeights};
use prediction_core::{PredictionError, PredictionKey, PredictionRecord, Timeframe};
use prediction_engine::PredictionEngine;

/// Per-run batch outcome counts. Every symbol lands in exactly one bucket.
#[derive(Debug, Default)]
pub struct ScreenSummary {
    pub total: usize,
    pub generated: usize,
    pub cache_hits: usize,
    /// No data / rate-limited after retries: real absence, not an error
    pub skipped: usize,
    pub failed: usize,
}

impl ScreenSummary {
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

enum SymbolOutcome {
    Generated(Box<PredictionRecord>),
    CacheHit(Box<PredictionRecord>),
    Skipped,
    Failed,
}

/// Screen a universe: one prediction per symbol for the given date, bounded
/// by a worker-pool semaphore. Each symbol's record is persisted as soon as
/// it is generated, so cancelling mid-batch keeps everything finished so far.
pub async fn run_screen(
    engine: Arc<PredictionEngine>,
    symbols: Vec<String>,
    timeframe: Timeframe,
    as_of: DateTime<Utc>,
    workers: usize,
) -> (ScreenSummary, Vec<PredictionRecord>) {
    let total = symbols.len();
    let semaphore = Arc::new(Semaphore::new(workers));
    let done = Arc::new(AtomicU64::new(0));

    let mut handles = Vec::with_capacity(total);
    for symbol in symbols {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        let done = Arc::clone(&done);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire().await.expect("semaphore never closed");

            let outcome = screen_symbol(&engine, &symbol, timeframe, as_of).await;
            let finished = done.fetch_add(1, Ordering::Relaxed) + 1;
            match &outcome {
                SymbolOutcome::Generated(record) => tracing::info!(
                    "[{}/{}] {} => {} {:.1}%",
                    finished,
                    total,
                    symbol,
                    record.direction.as_str(),
                    record.confidence
                ),
                SymbolOutcome::CacheHit(_) => {
                    tracing::debug!("[{}/{}] {} cached", finished, total, symbol)
                }
                SymbolOutcome::Skipped => {
                    tracing::info!("[{}/{}] {} skipped", finished, total, symbol)
                }
                SymbolOutcome::Failed => {
                    tracing::warn!("[{}/{}] {} failed", finished, total, symbol)
                }
            }
            outcome
        }));
    }

    let mut summary = ScreenSummary {
        total,
        ..Default::default()
    };
    let mut records = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(SymbolOutcome::Generated(record)) => {
                summary.generated += 1;
                records.push(*record);
            }
            Ok(SymbolOutcome::CacheHit(record)) => {
                summary.cache_hits += 1;
                records.push(*record);
            }
            Ok(SymbolOutcome::Skipped) => summary.skipped += 1,
            Ok(SymbolOutcome::Failed) => summary.failed += 1,
            Err(e) => {
                tracing::error!("screen task panicked: {}", e);
                summary.failed += 1;
            }
        }
    }

    tracing::info!(
        "screen complete: {} generated, {} cached, {} skipped, {} failed of {}",
        summary.generated,
        summary.cache_hits,
        summary.skipped,
        summary.failed,
        summary.total
    );

    (summary, records)
}

async fn screen_symbol(
    engine: &PredictionEngine,
    symbol: &str,
    timeframe: Timeframe,
    as_of: DateTime<Utc>,
) -> SymbolOutcome {
    let key = PredictionKey::new(symbol, as_of.date_naive(), timeframe);
    let was_cached = matches!(engine.store().get(&key).await, Ok(Some(_)));

    match engine.get_or_create(symbol, timeframe, as_of).await {
        Ok(record) if was_cached => SymbolOutcome::CacheHit(Box::new(record)),
        Ok(record) => SymbolOutcome::Generated(Box::new(record)),
        Err(PredictionError::NoDataAvailable(reason)) => {
            tracing::info!("{}: no data, skipping ({})", symbol, reason);
            SymbolOutcome::Skipped
        }
        Err(PredictionError::RateLimitExceeded(reason)) => {
            // The client already retried with backoff; give up on the symbol
            tracing::warn!("{}: still rate limited, skipping ({})", symbol, reason);
            SymbolOutcome::Skipped
        }
        Err(e) => {
            tracing::error!("{}: {}", symbol, e);
            SymbolOutcome::Failed
        }
    }
}

/// Rank the screened records and log the leaders.
pub fn log_top_opportunities(records: &[PredictionRecord], limit: usize) {
    let candidates: Vec<Opportunity> = records.iter().map(Opportunity::from_record).collect();
    let ranked = rank(candidates, &RankingWeights::default());

    for (i, opportunity) in ranked.iter().take(limit).enumerate() {
        tracing::info!(
            "#{:<2} {:<6} {:<4} composite {:.3} (confidence {:.1}, risk {:.2})",
            i + 1,
            opportunity.symbol,
            opportunity.direction.as_str(),
            opportunity.composite,
            opportunity.confidence,
            opportunity.risk_score
        );
    }
}
