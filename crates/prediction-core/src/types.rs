use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// OHLCV bar data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Directional call on an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Hold => "HOLD",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(Direction::Buy),
            "SELL" => Some(Direction::Sell),
            "HOLD" => Some(Direction::Hold),
            _ => None,
        }
    }
}

/// Prediction horizon. One cached record exists per (symbol, date, timeframe).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    EndOfDay,
    Weekly,
    IntradayHour,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::EndOfDay => "eod",
            Timeframe::Weekly => "weekly",
            Timeframe::IntradayHour => "intraday-1h",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "eod" => Some(Timeframe::EndOfDay),
            "weekly" => Some(Timeframe::Weekly),
            "intraday-1h" => Some(Timeframe::IntradayHour),
            _ => None,
        }
    }

    /// Instant the prediction is judged against.
    ///
    /// End-of-day resolves at 21:00 UTC (US market close) of the prediction
    /// date, weekly at the following Friday's close, intraday one hour after
    /// the anchor timestamp.
    pub fn target_time(&self, as_of: DateTime<Utc>) -> DateTime<Utc> {
        let close_of = |date: NaiveDate| {
            date.and_hms_opt(21, 0, 0)
                .expect("21:00:00 is a valid time")
                .and_utc()
        };

        match self {
            Timeframe::EndOfDay => close_of(as_of.date_naive()),
            Timeframe::Weekly => {
                let mut date = as_of.date_naive() + Duration::days(1);
                while date.weekday() != Weekday::Fri {
                    date += Duration::days(1);
                }
                close_of(date)
            }
            Timeframe::IntradayHour => as_of + Duration::hours(1),
        }
    }

    /// Bar interval + lookback used to build the input window.
    pub fn default_window(&self, as_of: DateTime<Utc>) -> DataWindowSpec {
        let (interval, lookback_days) = match self {
            Timeframe::EndOfDay => ("1d", 90),
            Timeframe::Weekly => ("1d", 180),
            Timeframe::IntradayHour => ("1h", 10),
        };
        DataWindowSpec {
            interval: interval.to_string(),
            lookback_days,
            anchor: as_of,
        }
    }
}

/// Lifecycle state of a cached prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordState {
    Active,
    Completed,
    Invalidated,
}

impl RecordState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordState::Active => "ACTIVE",
            RecordState::Completed => "COMPLETED",
            RecordState::Invalidated => "INVALIDATED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(RecordState::Active),
            "COMPLETED" => Some(RecordState::Completed),
            "INVALIDATED" => Some(RecordState::Invalidated),
            _ => None,
        }
    }
}

/// Unique identity of a cached prediction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PredictionKey {
    pub symbol: String,
    pub prediction_date: NaiveDate,
    pub timeframe: Timeframe,
}

impl PredictionKey {
    pub fn new(symbol: &str, prediction_date: NaiveDate, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            prediction_date,
            timeframe,
        }
    }

    /// Canonical string form, used for per-key locks and log context.
    pub fn cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.symbol,
            self.prediction_date.format("%Y-%m-%d"),
            self.timeframe.as_str()
        )
    }
}

/// The exact data window a prediction was generated from. Anchored to the
/// caller's `as_of` so two processes racing on the same key compute
/// identical inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataWindowSpec {
    pub interval: String,
    pub lookback_days: i64,
    pub anchor: DateTime<Utc>,
}

/// One provider's raw answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalSnapshot {
    pub provider_id: String,
    pub direction: Direction,
    /// 0-100
    pub confidence: f64,
}

/// A provider's vote as actually counted by the combiner, with the weight
/// applied after dropping unavailable providers and renormalizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentVote {
    pub provider_id: String,
    pub direction: Direction,
    pub confidence: f64,
    pub nominal_weight: f64,
    pub applied_weight: f64,
}

/// Volume/participation strength, adjusts confidence only (never direction)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Participation {
    Strong,
    Normal,
    Weak,
}

/// Type of a known or discovered upcoming event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Earnings,
    DividendExDate,
    RegulatoryDisclosure,
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::Earnings => "Earnings",
            EventType::DividendExDate => "Dividend Ex-Date",
            EventType::RegulatoryDisclosure => "Regulatory Disclosure",
            EventType::Other(s) => s,
        }
    }
}

/// Where an event entry came from. Manual overrides must carry a source URL
/// so every sit-out decision is auditable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Feed,
    Manual { source_url: String },
}

/// A known or discovered upcoming event for a symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub symbol: String,
    pub event_type: EventType,
    pub date: NaiveDate,
    pub title: String,
    pub source: EventSource,
    /// Confidence that the date is right (0-1); feed estimates can slip.
    pub date_confidence: f64,
}

/// Rolling sentiment aggregate from the sentiment collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentAggregate {
    pub label: String,
    /// Compound score in [-1, 1]
    pub compound_score: f64,
    /// 0-1
    pub confidence: f64,
    pub article_count: usize,
}

/// Risk Guard output, embedded in the prediction record it gated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0-1, event proximity weighted heaviest
    pub risk_score: f64,
    pub nearest_event: Option<EventRecord>,
    pub days_to_event: Option<i64>,
    pub rolling_sentiment_72h: Option<f64>,
    pub volatility_spike_ratio: Option<f64>,
    pub beta_vs_benchmark: Option<f64>,
    /// Proportional confidence reduction, 0-0.70
    pub haircut: f64,
    /// Sit-out: direction forced to HOLD regardless of the ensemble
    pub forced_hold: bool,
    pub reason: String,
}

impl RiskAssessment {
    /// Assessment for a symbol with nothing elevated. Used when risk inputs
    /// are unavailable; absence of risk data is not absence of a prediction.
    pub fn quiet() -> Self {
        Self {
            risk_score: 0.0,
            nearest_event: None,
            days_to_event: None,
            rolling_sentiment_72h: None,
            volatility_spike_ratio: None,
            beta_vs_benchmark: None,
            haircut: 0.0,
            forced_hold: false,
            reason: "no elevated risk signals".to_string(),
        }
    }

    /// Suggested hedge ratio from beta; sizing advice only, never a gate.
    pub fn suggested_hedge_ratio(&self) -> Option<f64> {
        self.beta_vs_benchmark.map(|b| b.clamp(0.0, 2.0) / 2.0)
    }
}

/// One cached forecast. Created exactly once per key, read-only afterwards
/// except for the outcome fields written by the validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    // Identity
    pub symbol: String,
    pub timeframe: Timeframe,
    pub prediction_date: NaiveDate,
    pub target_time: DateTime<Utc>,

    // Inputs at generation
    pub current_price: f64,
    pub data_window: DataWindowSpec,
    pub component_breakdown: Vec<ComponentVote>,

    // Output
    pub direction: Direction,
    pub predicted_price: f64,
    pub predicted_change_pct: f64,
    /// 0-100
    pub confidence: f64,

    // Risk overlay
    pub risk_score: f64,
    pub weight_haircut_applied: f64,
    pub forced_hold: bool,
    pub risk_reason: String,

    // Outcome, filled post-hoc by the validator
    pub actual_price: Option<f64>,
    pub error_pct: Option<f64>,
    pub correct: Option<bool>,
    pub validated_at: Option<DateTime<Utc>>,

    pub state: RecordState,
    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn key(&self) -> PredictionKey {
        PredictionKey::new(&self.symbol, self.prediction_date, self.timeframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eod_target_is_same_day_close() {
        let as_of = "2025-03-04T14:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let target = Timeframe::EndOfDay.target_time(as_of);
        assert_eq!(target, "2025-03-04T21:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn weekly_target_is_next_friday_close() {
        // 2025-03-04 is a Tuesday; next Friday is 2025-03-07
        let as_of = "2025-03-04T14:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let target = Timeframe::Weekly.target_time(as_of);
        assert_eq!(target, "2025-03-07T21:00:00Z".parse::<DateTime<Utc>>().unwrap());

        // From a Friday, the target rolls to the following week
        let friday = "2025-03-07T14:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let target = Timeframe::Weekly.target_time(friday);
        assert_eq!(target, "2025-03-14T21:00:00Z".parse::<DateTime<Utc>>().unwrap());
    }

    #[test]
    fn intraday_target_is_one_hour_out() {
        let as_of = "2025-03-04T14:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let target = Timeframe::IntradayHour.target_time(as_of);
        assert_eq!(target, as_of + Duration::hours(1));
    }

    #[test]
    fn cache_key_is_canonical() {
        let key = PredictionKey::new(
            "aapl",
            NaiveDate::from_ymd_opt(2025, 3, 4).unwrap(),
            Timeframe::EndOfDay,
        );
        assert_eq!(key.cache_key(), "AAPL:2025-03-04:eod");
    }

    #[test]
    fn direction_round_trips() {
        for d in [Direction::Buy, Direction::Sell, Direction::Hold] {
            assert_eq!(Direction::from_str(d.as_str()), Some(d));
        }
        assert_eq!(Direction::from_str("LONG"), None);
    }
}
