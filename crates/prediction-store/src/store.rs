use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{AnyPool, FromRow};

use prediction_core::{
    Direction, PredictionKey, PredictionRecord, RecordState, Timeframe,
};

/// Outcome fields written by the validator on the ACTIVE -> COMPLETED
/// transition. No other mutation path exists for completed records.
#[derive(Debug, Clone)]
pub struct OutcomeUpdate {
    pub actual_price: f64,
    pub error_pct: f64,
    pub correct: bool,
    pub validated_at: DateTime<Utc>,
}

/// Internal DB row with String dates and JSON blobs (compatible with the
/// sqlx Any backend)
#[derive(Debug, FromRow)]
struct PredictionRow {
    symbol: String,
    timeframe: String,
    prediction_date: String,
    target_time: String,
    current_price: f64,
    data_window_json: String,
    component_breakdown_json: String,
    direction: String,
    predicted_price: f64,
    predicted_change_pct: f64,
    confidence: f64,
    risk_score: f64,
    weight_haircut_applied: f64,
    forced_hold: i64,
    risk_reason: String,
    actual_price: Option<f64>,
    error_pct: Option<f64>,
    correct: Option<i64>,
    validated_at: Option<String>,
    state: String,
    created_at: String,
}

impl PredictionRow {
    fn into_record(self) -> Result<PredictionRecord> {
        Ok(PredictionRecord {
            symbol: self.symbol,
            timeframe: Timeframe::from_str(&self.timeframe)
                .ok_or_else(|| anyhow!("unknown timeframe {:?} in store", self.timeframe))?,
            prediction_date: self.prediction_date.parse::<NaiveDate>()?,
            target_time: self.target_time.parse::<DateTime<Utc>>()?,
            current_price: self.current_price,
            data_window: serde_json::from_str(&self.data_window_json)?,
            component_breakdown: serde_json::from_str(&self.component_breakdown_json)?,
            direction: Direction::from_str(&self.direction)
                .ok_or_else(|| anyhow!("unknown direction {:?} in store", self.direction))?,
            predicted_price: self.predicted_price,
            predicted_change_pct: self.predicted_change_pct,
            confidence: self.confidence,
            risk_score: self.risk_score,
            weight_haircut_applied: self.weight_haircut_applied,
            forced_hold: self.forced_hold != 0,
            risk_reason: self.risk_reason,
            actual_price: self.actual_price,
            error_pct: self.error_pct,
            correct: self.correct.map(|c| c != 0),
            validated_at: self
                .validated_at
                .map(|s| s.parse::<DateTime<Utc>>())
                .transpose()?,
            state: RecordState::from_str(&self.state)
                .ok_or_else(|| anyhow!("unknown state {:?} in store", self.state))?,
            created_at: self.created_at.parse::<DateTime<Utc>>()?,
        })
    }
}

const SELECT_COLUMNS: &str = "symbol, timeframe, prediction_date, target_time, current_price, \
     data_window_json, component_breakdown_json, direction, predicted_price, \
     predicted_change_pct, confidence, risk_score, weight_haircut_applied, \
     forced_hold, risk_reason, actual_price, error_pct, correct, validated_at, \
     state, created_at";

/// Store for prediction records
#[derive(Clone)]
pub struct PredictionStore {
    pool: AnyPool,
}

impl PredictionStore {
    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    /// Create the predictions table and its unique index if missing.
    ///
    /// The partial unique index excludes INVALIDATED rows: an admin
    /// invalidate-and-regenerate keeps the dead row for audit while
    /// allowing exactly one live record per key.
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS predictions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                prediction_date TEXT NOT NULL,
                target_time TEXT NOT NULL,
                current_price REAL NOT NULL,
                data_window_json TEXT NOT NULL,
                component_breakdown_json TEXT NOT NULL,
                direction TEXT NOT NULL,
                predicted_price REAL NOT NULL,
                predicted_change_pct REAL NOT NULL,
                confidence REAL NOT NULL,
                risk_score REAL NOT NULL,
                weight_haircut_applied REAL NOT NULL,
                forced_hold INTEGER NOT NULL DEFAULT 0,
                risk_reason TEXT NOT NULL DEFAULT '',
                actual_price REAL,
                error_pct REAL,
                correct INTEGER,
                validated_at TEXT,
                state TEXT NOT NULL DEFAULT 'ACTIVE',
                created_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_predictions_key
             ON predictions (symbol, prediction_date, timeframe)
             WHERE state != 'INVALIDATED'",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_predictions_due
             ON predictions (state, target_time)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch the live (non-invalidated) record for a key, if any.
    pub async fn get(&self, key: &PredictionKey) -> Result<Option<PredictionRecord>> {
        let row: Option<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM predictions
             WHERE symbol = ? AND prediction_date = ? AND timeframe = ?
               AND state != 'INVALIDATED'"
        ))
        .bind(&key.symbol)
        .bind(key.prediction_date.format("%Y-%m-%d").to_string())
        .bind(key.timeframe.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_record()).transpose()
    }

    /// Insert a record unless one already exists for its key. Returns true
    /// when this call inserted, false when another writer got there first.
    /// Atomic: backed by the unique index, not a read-then-write.
    pub async fn put_if_absent(&self, record: &PredictionRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO predictions (
                symbol, timeframe, prediction_date, target_time, current_price,
                data_window_json, component_breakdown_json, direction,
                predicted_price, predicted_change_pct, confidence, risk_score,
                weight_haircut_applied, forced_hold, risk_reason, state, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.symbol)
        .bind(record.timeframe.as_str())
        .bind(record.prediction_date.format("%Y-%m-%d").to_string())
        .bind(record.target_time.to_rfc3339())
        .bind(record.current_price)
        .bind(serde_json::to_string(&record.data_window)?)
        .bind(serde_json::to_string(&record.component_breakdown)?)
        .bind(record.direction.as_str())
        .bind(record.predicted_price)
        .bind(record.predicted_change_pct)
        .bind(record.confidence)
        .bind(record.risk_score)
        .bind(record.weight_haircut_applied)
        .bind(record.forced_hold)
        .bind(&record.risk_reason)
        .bind(record.state.as_str())
        .bind(record.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tracing::debug!(
                    "put_if_absent lost the race for {}",
                    record.key().cache_key()
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write outcome fields and flip ACTIVE -> COMPLETED. Guarded on state so
    /// a second validator pass is a no-op at the SQL level; returns whether a
    /// row transitioned.
    pub async fn complete(&self, key: &PredictionKey, outcome: &OutcomeUpdate) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE predictions
             SET actual_price = ?, error_pct = ?, correct = ?, validated_at = ?,
                 state = 'COMPLETED'
             WHERE symbol = ? AND prediction_date = ? AND timeframe = ?
               AND state = 'ACTIVE'",
        )
        .bind(outcome.actual_price)
        .bind(outcome.error_pct)
        .bind(outcome.correct)
        .bind(outcome.validated_at.to_rfc3339())
        .bind(&key.symbol)
        .bind(key.prediction_date.format("%Y-%m-%d").to_string())
        .bind(key.timeframe.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Admin-only: mark the live record for a key INVALIDATED. Never called
    /// automatically. Returns whether a row was invalidated.
    pub async fn invalidate(&self, key: &PredictionKey) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE predictions
             SET state = 'INVALIDATED'
             WHERE symbol = ? AND prediction_date = ? AND timeframe = ?
               AND state != 'INVALIDATED'",
        )
        .bind(&key.symbol)
        .bind(key.prediction_date.format("%Y-%m-%d").to_string())
        .bind(key.timeframe.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// ACTIVE records whose target time has passed, oldest first. The
    /// validator's work queue.
    pub async fn active_due(&self, as_of: DateTime<Utc>) -> Result<Vec<PredictionRecord>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM predictions
             WHERE state = 'ACTIVE' AND target_time <= ?
             ORDER BY target_time ASC"
        ))
        .bind(as_of.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    /// Records for one symbol since a date, newest first. Reporting surface.
    pub async fn records_for_symbol(
        &self,
        symbol: &str,
        since: NaiveDate,
    ) -> Result<Vec<PredictionRecord>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM predictions
             WHERE symbol = ? AND prediction_date >= ? AND state != 'INVALIDATED'
             ORDER BY prediction_date DESC"
        ))
        .bind(symbol.to_uppercase())
        .bind(since.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    /// All live records in a date range, for batch reporting.
    pub async fn records_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<PredictionRecord>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM predictions
             WHERE prediction_date >= ? AND prediction_date <= ?
               AND state != 'INVALIDATED'
             ORDER BY prediction_date DESC, symbol ASC"
        ))
        .bind(from.format("%Y-%m-%d").to_string())
        .bind(to.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }

    /// Completed records for one (symbol, timeframe) since a date. Input to
    /// the incremental stats recompute.
    pub async fn completed_for(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        since: NaiveDate,
    ) -> Result<Vec<PredictionRecord>> {
        let rows: Vec<PredictionRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_COLUMNS} FROM predictions
             WHERE symbol = ? AND timeframe = ? AND prediction_date >= ?
               AND state = 'COMPLETED'
             ORDER BY prediction_date ASC"
        ))
        .bind(symbol.to_uppercase())
        .bind(timeframe.as_str())
        .bind(since.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_record()).collect()
    }
}
