//! Opportunity ranker.
//!
//! Pure scoring over already-generated predictions: no I/O, no clocks, no
//! randomness. Same candidates in, same order out, which is what makes a
//! screen re-run comparable with the morning's run.

use serde::{Deserialize, Serialize};

use prediction_core::{Direction, PredictionError, PredictionRecord};

/// Relative weights of the composite's inputs; must sum to 1.0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankingWeights {
    pub confidence: f64,
    /// Weight on (1 - risk_score)
    pub safety: f64,
    pub technical: f64,
}

impl Default for RankingWeights {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            safety: 0.3,
            technical: 0.2,
        }
    }
}

impl RankingWeights {
    pub fn validate(&self) -> Result<(), PredictionError> {
        let sum = self.confidence + self.safety + self.technical;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(PredictionError::InvalidConfig(format!(
                "ranking weights must sum to 1.0, got {:.9}",
                sum
            )));
        }
        if self.confidence < 0.0 || self.safety < 0.0 || self.technical < 0.0 {
            return Err(PredictionError::InvalidConfig(
                "ranking weights must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One screen candidate with its composite score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,
    pub direction: Direction,
    /// 0-100
    pub confidence: f64,
    /// 0-1
    pub risk_score: f64,
    /// 0-1, strength of the technical-provider agreement
    pub technical_score: f64,
    pub composite: f64,
}

impl Opportunity {
    /// Build a candidate from a prediction record. The technical score is
    /// the confidence-weighted share of bar-derived providers agreeing with
    /// the final call.
    pub fn from_record(record: &PredictionRecord) -> Self {
        let technical_score = record
            .component_breakdown
            .iter()
            .filter(|v| v.provider_id == "momentum" || v.provider_id == "indicator-voter")
            .filter(|v| v.direction == record.direction)
            .map(|v| v.applied_weight * (v.confidence / 100.0))
            .sum::<f64>()
            .clamp(0.0, 1.0);

        Self {
            symbol: record.symbol.clone(),
            direction: record.direction,
            confidence: record.confidence,
            risk_score: record.risk_score,
            technical_score,
            composite: 0.0,
        }
    }
}

/// Score and sort candidates, best first.
///
/// Composite is a weighted sum of normalized confidence, safety
/// (1 - risk_score), and the technical score. The sort is stable and exact
/// composite ties break on symbol name, so equal inputs can never flip order
/// between runs.
pub fn rank(mut candidates: Vec<Opportunity>, weights: &RankingWeights) -> Vec<Opportunity> {
    for candidate in &mut candidates {
        candidate.composite = weights.confidence * (candidate.confidence / 100.0).clamp(0.0, 1.0)
            + weights.safety * (1.0 - candidate.risk_score).clamp(0.0, 1.0)
            + weights.technical * candidate.technical_score.clamp(0.0, 1.0);
    }

    candidates.sort_by(|a, b| {
        b.composite
            .total_cmp(&a.composite)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
    candidates
}
