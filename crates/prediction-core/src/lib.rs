pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::{EnsembleConfig, HaircutTier, RiskGuardConfig, ValidatorConfig};
pub use error::PredictionError;
pub use traits::{EventCalendarProvider, MarketDataProvider, SentimentProvider, SignalProvider};
pub use types::{
    Bar, ComponentVote, DataWindowSpec, Direction, EventRecord, EventSource, EventType,
    Participation, PredictionKey, PredictionRecord, RecordState, RiskAssessment,
    SentimentAggregate, SignalSnapshot, Timeframe,
};
