//! Accuracy validator.
//!
//! A once-per-day job that reconciles cached predictions against realized
//! closes: every ACTIVE record whose target time has passed gets its outcome
//! written and its (symbol, timeframe) accuracy stats recomputed. A close
//! that cannot be fetched leaves the record ACTIVE for the next run; a
//! prediction is never marked incorrect because a data feed was down.

mod job;
mod stats;

pub use job::{AccuracyValidator, ValidationRun};
pub use stats::{AccuracyStats, AccuracyStatsStore, CalibrationBucket, DirectionStats};

#[cfg(test)]
mod tests;
