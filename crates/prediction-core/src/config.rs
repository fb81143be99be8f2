use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::PredictionError;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

/// Ensemble weighting, one entry per provider ID. Replaces the hardcoded
/// per-call weights the legacy system scattered across versions: validated
/// once at startup, applied everywhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// provider_id -> nominal weight; must sum to 1.0
    pub weights: HashMap<String, f64>,
    /// Floor/ceiling for reported confidence. Never absolute certainty,
    /// never below chance.
    pub confidence_floor: f64,
    pub confidence_ceiling: f64,
    /// Confidence cap when the weighted vote is an exact tie
    pub tie_confidence_cap: f64,
    /// Additive confidence adjustment for strong participation
    pub strong_participation_bonus: f64,
    /// Additive confidence adjustment for weak participation (negative)
    pub weak_participation_penalty: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        let mut weights = HashMap::new();
        weights.insert("sequence-forecaster".to_string(), 0.35);
        weights.insert("momentum".to_string(), 0.25);
        weights.insert("indicator-voter".to_string(), 0.25);
        weights.insert("sentiment".to_string(), 0.15);

        Self {
            weights,
            confidence_floor: 50.0,
            confidence_ceiling: 95.0,
            tie_confidence_cap: 60.0,
            strong_participation_bonus: 10.0,
            weak_participation_penalty: -15.0,
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), PredictionError> {
        if self.weights.is_empty() {
            return Err(PredictionError::InvalidConfig(
                "ensemble weights are empty".to_string(),
            ));
        }

        let sum: f64 = self.weights.values().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(PredictionError::InvalidConfig(format!(
                "ensemble weights must sum to 1.0, got {:.9}",
                sum
            )));
        }

        if self.weights.values().any(|w| *w < 0.0) {
            return Err(PredictionError::InvalidConfig(
                "ensemble weights must be non-negative".to_string(),
            ));
        }

        if self.confidence_floor >= self.confidence_ceiling {
            return Err(PredictionError::InvalidConfig(format!(
                "confidence floor {} must be below ceiling {}",
                self.confidence_floor, self.confidence_ceiling
            )));
        }

        Ok(())
    }

    pub fn nominal_weight(&self, provider_id: &str) -> Option<f64> {
        self.weights.get(provider_id).copied()
    }
}

/// One rung of the haircut ladder: at or above `min_score`, apply `haircut`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HaircutTier {
    pub min_score: f64,
    pub haircut: f64,
}

/// Event Risk Guard tuning. The tier thresholds come from the legacy
/// system's documentation; manually tuned, so configurable rather than
/// baked in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskGuardConfig {
    /// Forward event lookahead window, days
    pub event_lookahead_days: i64,
    /// Sit-out buffer around earnings, days either side
    pub earnings_buffer_days: i64,
    /// Sit-out buffer around a dividend ex-date, days either side
    pub dividend_buffer_days: i64,
    /// 72h sentiment below this raises risk on its own
    pub negative_sentiment_threshold: f64,
    pub sentiment_window_hours: i64,
    /// 10d/30d realized vol ratio above this counts as a spike
    pub volatility_spike_multiplier: f64,
    /// Haircut ladder, ordered by descending min_score
    pub tiers: Vec<HaircutTier>,
    /// Scores at or above this force the direction to HOLD
    pub forced_hold_threshold: f64,
    /// Benchmark symbol for beta
    pub benchmark_symbol: String,
}

impl Default for RiskGuardConfig {
    fn default() -> Self {
        Self {
            event_lookahead_days: 7,
            earnings_buffer_days: 3,
            dividend_buffer_days: 1,
            negative_sentiment_threshold: -0.10,
            sentiment_window_hours: 72,
            volatility_spike_multiplier: 1.35,
            tiers: vec![
                HaircutTier { min_score: 0.80, haircut: 0.70 },
                HaircutTier { min_score: 0.50, haircut: 0.45 },
                HaircutTier { min_score: 0.25, haircut: 0.20 },
            ],
            forced_hold_threshold: 0.80,
            benchmark_symbol: "SPY".to_string(),
        }
    }
}

impl RiskGuardConfig {
    pub fn validate(&self) -> Result<(), PredictionError> {
        if self.tiers.is_empty() {
            return Err(PredictionError::InvalidConfig(
                "haircut tiers are empty".to_string(),
            ));
        }

        // Monotonic ladder: tuning must not be able to invert it
        for pair in self.tiers.windows(2) {
            if pair[1].min_score >= pair[0].min_score {
                return Err(PredictionError::InvalidConfig(
                    "haircut tiers must be ordered by descending min_score".to_string(),
                ));
            }
            if pair[1].haircut >= pair[0].haircut {
                return Err(PredictionError::InvalidConfig(
                    "haircuts must decrease with lower risk tiers".to_string(),
                ));
            }
        }

        for tier in &self.tiers {
            if !(0.0..=1.0).contains(&tier.min_score) || !(0.0..=0.70).contains(&tier.haircut) {
                return Err(PredictionError::InvalidConfig(format!(
                    "tier out of range: min_score {} haircut {}",
                    tier.min_score, tier.haircut
                )));
            }
        }

        Ok(())
    }

    /// Haircut for a risk score, walking the ladder top down.
    pub fn haircut_for(&self, risk_score: f64) -> f64 {
        self.tiers
            .iter()
            .find(|t| risk_score >= t.min_score)
            .map(|t| t.haircut)
            .unwrap_or(0.0)
    }
}

/// Accuracy Validator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// A prediction is correct when |actual - predicted| / predicted is
    /// within this fraction
    pub tolerance_pct: f64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self { tolerance_pct: 0.02 }
    }
}

impl ValidatorConfig {
    /// Judge a realized price against a prediction: (error_pct, correct).
    /// The same rule applies to HOLD calls; a HOLD is correct when the price
    /// stayed within tolerance of where it was.
    pub fn judge(&self, predicted_price: f64, actual_price: f64) -> (f64, bool) {
        let error_pct = (actual_price - predicted_price).abs() / predicted_price;
        (error_pct, error_pct <= self.tolerance_pct)
    }
}
