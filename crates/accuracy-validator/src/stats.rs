use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{AnyPool, FromRow};

use prediction_core::{Direction, PredictionRecord, Timeframe};

/// Confidence bucket edges. Haircuts can push reported confidence below 50,
/// so the ladder starts at zero.
const BUCKET_EDGES: [(f64, f64); 6] = [
    (0.0, 50.0),
    (50.0, 60.0),
    (60.0, 70.0),
    (70.0, 80.0),
    (80.0, 90.0),
    (90.0, 100.0),
];

/// Hit rate within one stated-confidence band. Comparing `correct / total`
/// against the band itself is the calibration check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lo: f64,
    pub hi: f64,
    pub total: u64,
    pub correct: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectionStats {
    pub total: u64,
    pub correct: u64,
}

impl DirectionStats {
    pub fn accuracy_pct(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64 * 100.0)
        }
    }
}

/// Accuracy rollup for one (symbol, timeframe, period). Always recomputed
/// from completed records; the records stay authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccuracyStats {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub period: String,
    pub total: u64,
    pub correct: u64,
    pub mean_abs_error_pct: f64,
    pub by_direction: HashMap<String, DirectionStats>,
    pub calibration: Vec<CalibrationBucket>,
    pub computed_at: DateTime<Utc>,
}

impl AccuracyStats {
    pub fn accuracy_pct(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64 * 100.0)
        }
    }

    /// Roll up a set of COMPLETED records. Records without outcome fields
    /// are skipped rather than guessed at.
    pub fn from_records(
        symbol: &str,
        timeframe: Timeframe,
        period: &str,
        records: &[PredictionRecord],
    ) -> Self {
        let mut total = 0u64;
        let mut correct = 0u64;
        let mut error_sum = 0.0;
        let mut by_direction: HashMap<String, DirectionStats> = HashMap::new();
        let mut calibration: Vec<CalibrationBucket> = BUCKET_EDGES
            .iter()
            .map(|(lo, hi)| CalibrationBucket {
                lo: *lo,
                hi: *hi,
                total: 0,
                correct: 0,
            })
            .collect();

        for record in records {
            let (Some(was_correct), Some(error_pct)) = (record.correct, record.error_pct) else {
                continue;
            };

            total += 1;
            error_sum += error_pct;
            if was_correct {
                correct += 1;
            }

            let entry = by_direction
                .entry(record.direction.as_str().to_string())
                .or_default();
            entry.total += 1;
            if was_correct {
                entry.correct += 1;
            }

            if let Some(bucket) = calibration
                .iter_mut()
                .find(|b| record.confidence >= b.lo && (record.confidence < b.hi || b.hi >= 100.0))
            {
                bucket.total += 1;
                if was_correct {
                    bucket.correct += 1;
                }
            }
        }

        Self {
            symbol: symbol.to_uppercase(),
            timeframe,
            period: period.to_string(),
            total,
            correct,
            mean_abs_error_pct: if total > 0 {
                error_sum / total as f64
            } else {
                0.0
            },
            by_direction,
            calibration,
            computed_at: Utc::now(),
        }
    }

    pub fn direction_stats(&self, direction: Direction) -> DirectionStats {
        self.by_direction
            .get(direction.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    symbol: String,
    timeframe: String,
    period: String,
    total: i64,
    correct: i64,
    mean_abs_error_pct: f64,
    direction_json: String,
    calibration_json: String,
    computed_at: String,
}

impl StatsRow {
    fn into_stats(self) -> Result<AccuracyStats> {
        Ok(AccuracyStats {
            symbol: self.symbol,
            timeframe: Timeframe::from_str(&self.timeframe)
                .ok_or_else(|| anyhow::anyhow!("unknown timeframe {:?} in stats", self.timeframe))?,
            period: self.period,
            total: self.total as u64,
            correct: self.correct as u64,
            mean_abs_error_pct: self.mean_abs_error_pct,
            by_direction: serde_json::from_str(&self.direction_json)?,
            calibration: serde_json::from_str(&self.calibration_json)?,
            computed_at: self.computed_at.parse::<DateTime<Utc>>()?,
        })
    }
}

/// Persisted rollups, one row per (symbol, timeframe, period), upserted on
/// every recompute.
#[derive(Clone)]
pub struct AccuracyStatsStore {
    pool: AnyPool,
}

impl AccuracyStatsStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accuracy_stats (
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                period TEXT NOT NULL,
                total INTEGER NOT NULL,
                correct INTEGER NOT NULL,
                mean_abs_error_pct REAL NOT NULL,
                direction_json TEXT NOT NULL,
                calibration_json TEXT NOT NULL,
                computed_at TEXT NOT NULL,
                PRIMARY KEY (symbol, timeframe, period)
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert(&self, stats: &AccuracyStats) -> Result<()> {
        sqlx::query(
            "INSERT INTO accuracy_stats (
                symbol, timeframe, period, total, correct, mean_abs_error_pct,
                direction_json, calibration_json, computed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (symbol, timeframe, period) DO UPDATE SET
                total = excluded.total,
                correct = excluded.correct,
                mean_abs_error_pct = excluded.mean_abs_error_pct,
                direction_json = excluded.direction_json,
                calibration_json = excluded.calibration_json,
                computed_at = excluded.computed_at",
        )
        .bind(&stats.symbol)
        .bind(stats.timeframe.as_str())
        .bind(&stats.period)
        .bind(stats.total as i64)
        .bind(stats.correct as i64)
        .bind(stats.mean_abs_error_pct)
        .bind(serde_json::to_string(&stats.by_direction)?)
        .bind(serde_json::to_string(&stats.calibration)?)
        .bind(stats.computed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: &str,
    ) -> Result<Option<AccuracyStats>> {
        let row: Option<StatsRow> = sqlx::query_as(
            "SELECT symbol, timeframe, period, total, correct, mean_abs_error_pct,
                    direction_json, calibration_json, computed_at
             FROM accuracy_stats
             WHERE symbol = ? AND timeframe = ? AND period = ?",
        )
        .bind(symbol.to_uppercase())
        .bind(timeframe.as_str())
        .bind(period)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_stats()).transpose()
    }

    pub async fn for_symbol(&self, symbol: &str) -> Result<Vec<AccuracyStats>> {
        let rows: Vec<StatsRow> = sqlx::query_as(
            "SELECT symbol, timeframe, period, total, correct, mean_abs_error_pct,
                    direction_json, calibration_json, computed_at
             FROM accuracy_stats
             WHERE symbol = ?
             ORDER BY timeframe, period",
        )
        .bind(symbol.to_uppercase())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_stats()).collect()
    }
}
