//! Ensemble combiner: merges surviving provider signals into one
//! directional call with a calibrated confidence.
//!
//! Unavailable providers are dropped and their weight is redistributed
//! across the survivors. A dropped provider is never counted as a
//! zero-confidence vote; that distinction is what keeps a two-provider day
//! comparable with a four-provider day.

use serde::{Deserialize, Serialize};

use prediction_core::{
    ComponentVote, Direction, EnsembleConfig, Participation, PredictionError, RiskAssessment,
    SignalSnapshot,
};

const TIE_EPSILON: f64 = 1e-9;

/// Combined call before it is wrapped into a prediction record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleOutcome {
    pub direction: Direction,
    /// 0-100, after participation adjustment and risk haircut
    pub confidence: f64,
    /// Confidence before the risk haircut was applied
    pub pre_haircut_confidence: f64,
    pub votes: Vec<ComponentVote>,
    pub tie: bool,
}

pub struct EnsembleCombiner {
    config: EnsembleConfig,
}

impl EnsembleCombiner {
    pub fn new(config: EnsembleConfig) -> Result<Self, PredictionError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Merge the surviving snapshots into one call.
    ///
    /// `participation` adjusts confidence only, never direction. The risk
    /// assessment's haircut multiplies the final confidence and its
    /// forced_hold overrides the direction outright.
    pub fn combine(
        &self,
        snapshots: &[SignalSnapshot],
        participation: Option<Participation>,
        risk: &RiskAssessment,
    ) -> Result<EnsembleOutcome, PredictionError> {
        let votes = self.renormalize(snapshots)?;

        let mut buy_weight = 0.0;
        let mut sell_weight = 0.0;
        let mut hold_weight = 0.0;
        for vote in &votes {
            match vote.direction {
                Direction::Buy => buy_weight += vote.applied_weight,
                Direction::Sell => sell_weight += vote.applied_weight,
                Direction::Hold => hold_weight += vote.applied_weight,
            }
        }

        let sides = [
            (Direction::Buy, buy_weight),
            (Direction::Sell, sell_weight),
            (Direction::Hold, hold_weight),
        ];
        let (mut winner, max_weight) = sides
            .iter()
            .copied()
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .expect("sides is non-empty");
        let tie = sides
            .iter()
            .filter(|(_, w)| (max_weight - w).abs() <= TIE_EPSILON)
            .count()
            > 1;

        // Agreement score: the winning side's weight scaled by how confident
        // that side actually was. Σ applied_weight * confidence over winners.
        let agreement: f64 = votes
            .iter()
            .filter(|v| v.direction == winner)
            .map(|v| v.applied_weight * v.confidence)
            .sum();

        let floor = self.config.confidence_floor;
        let ceiling = self.config.confidence_ceiling;
        let mut confidence = floor + (agreement / 100.0) * (ceiling - floor);

        if tie {
            winner = Direction::Hold;
            confidence = confidence.min(self.config.tie_confidence_cap);
        }

        // Participation nudges confidence inside the same band
        match participation {
            Some(Participation::Strong) => confidence += self.config.strong_participation_bonus,
            Some(Participation::Weak) => confidence += self.config.weak_participation_penalty,
            Some(Participation::Normal) | None => {}
        }
        confidence = confidence.clamp(floor, ceiling);

        let pre_haircut_confidence = confidence;

        // Risk overlay: haircut discounts confidence below the normal floor
        // when warranted; forced hold sits the call out entirely.
        if risk.haircut > 0.0 {
            confidence *= 1.0 - risk.haircut;
            tracing::debug!(
                "risk haircut {:.0}% applied: confidence {:.1} -> {:.1}",
                risk.haircut * 100.0,
                pre_haircut_confidence,
                confidence
            );
        }
        if risk.forced_hold {
            winner = Direction::Hold;
        }

        Ok(EnsembleOutcome {
            direction: winner,
            confidence,
            pre_haircut_confidence,
            votes,
            tie,
        })
    }

    /// Drop snapshots with no configured weight and renormalize the rest so
    /// applied weights sum to 1.0.
    pub fn renormalize(
        &self,
        snapshots: &[SignalSnapshot],
    ) -> Result<Vec<ComponentVote>, PredictionError> {
        let mut kept: Vec<(&SignalSnapshot, f64)> = Vec::with_capacity(snapshots.len());
        for snapshot in snapshots {
            match self.config.nominal_weight(&snapshot.provider_id) {
                Some(weight) if weight > 0.0 => kept.push((snapshot, weight)),
                Some(_) => {}
                None => {
                    tracing::warn!(
                        "provider {} has no configured weight, dropping its vote",
                        snapshot.provider_id
                    );
                }
            }
        }

        if kept.is_empty() {
            return Err(PredictionError::NoDataAvailable(
                "no weighted provider signals survived".to_string(),
            ));
        }

        let total: f64 = kept.iter().map(|(_, w)| w).sum();
        Ok(kept
            .into_iter()
            .map(|(snapshot, nominal)| ComponentVote {
                provider_id: snapshot.provider_id.clone(),
                direction: snapshot.direction,
                confidence: snapshot.confidence,
                nominal_weight: nominal,
                applied_weight: nominal / total,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn snapshot(provider_id: &str, direction: Direction, confidence: f64) -> SignalSnapshot {
        SignalSnapshot {
            provider_id: provider_id.to_string(),
            direction,
            confidence,
        }
    }

    fn combiner_with(weights: &[(&str, f64)]) -> EnsembleCombiner {
        let config = EnsembleConfig {
            weights: weights
                .iter()
                .map(|(id, w)| (id.to_string(), *w))
                .collect::<HashMap<_, _>>(),
            ..Default::default()
        };
        EnsembleCombiner::new(config).unwrap()
    }

    #[test]
    fn scenario_a_majority_buy_with_calibrated_confidence() {
        let combiner = combiner_with(&[("a", 0.45), ("b", 0.25), ("c", 0.30)]);
        let snapshots = [
            snapshot("a", Direction::Buy, 70.0),
            snapshot("b", Direction::Buy, 60.0),
            snapshot("c", Direction::Sell, 55.0),
        ];

        let outcome = combiner
            .combine(&snapshots, None, &RiskAssessment::quiet())
            .unwrap();

        assert_eq!(outcome.direction, Direction::Buy);
        assert!(
            outcome.confidence >= 60.0 && outcome.confidence <= 75.0,
            "confidence {} out of expected band",
            outcome.confidence
        );
        assert!(!outcome.tie);
    }

    #[test]
    fn scenario_b_high_risk_forces_hold() {
        let combiner = combiner_with(&[("a", 0.45), ("b", 0.25), ("c", 0.30)]);
        let snapshots = [
            snapshot("a", Direction::Buy, 70.0),
            snapshot("b", Direction::Buy, 60.0),
            snapshot("c", Direction::Sell, 55.0),
        ];

        let risk = RiskAssessment {
            risk_score: 0.85,
            haircut: 0.70,
            forced_hold: true,
            reason: "earnings in 2 days".to_string(),
            ..RiskAssessment::quiet()
        };

        let outcome = combiner.combine(&snapshots, None, &risk).unwrap();

        assert_eq!(outcome.direction, Direction::Hold);
        assert!(outcome.confidence < outcome.pre_haircut_confidence);
        // 70% haircut: only 30% of the calibrated confidence survives
        assert!(
            (outcome.confidence - outcome.pre_haircut_confidence * 0.30).abs() < 1e-9
        );
    }

    #[test]
    fn dropped_provider_weights_are_renormalized() {
        let combiner = combiner_with(&[("a", 0.45), ("b", 0.25), ("c", 0.30)]);
        // Provider "a" timed out: only b and c survived
        let snapshots = [
            snapshot("b", Direction::Buy, 60.0),
            snapshot("c", Direction::Sell, 55.0),
        ];

        let votes = combiner.renormalize(&snapshots).unwrap();
        let total: f64 = votes.iter().map(|v| v.applied_weight).sum();
        assert!((total - 1.0).abs() <= 1e-9);

        // 0.25 / 0.55 and 0.30 / 0.55
        assert!((votes[0].applied_weight - 0.25 / 0.55).abs() <= 1e-9);
        assert!((votes[1].applied_weight - 0.30 / 0.55).abs() <= 1e-9);
    }

    #[test]
    fn weight_conservation_over_every_subset() {
        let combiner = combiner_with(&[("a", 0.45), ("b", 0.25), ("c", 0.30)]);
        let all = [
            snapshot("a", Direction::Buy, 70.0),
            snapshot("b", Direction::Buy, 60.0),
            snapshot("c", Direction::Sell, 55.0),
        ];

        for mask in 1u32..8 {
            let subset: Vec<SignalSnapshot> = all
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, s)| s.clone())
                .collect();

            let votes = combiner.renormalize(&subset).unwrap();
            let total: f64 = votes.iter().map(|v| v.applied_weight).sum();
            assert!((total - 1.0).abs() <= 1e-9, "mask {:#b}: sum {}", mask, total);
        }
    }

    #[test]
    fn exact_tie_returns_hold_capped_at_sixty() {
        let combiner = combiner_with(&[("a", 0.5), ("b", 0.5)]);
        let snapshots = [
            snapshot("a", Direction::Buy, 95.0),
            snapshot("b", Direction::Sell, 95.0),
        ];

        let outcome = combiner
            .combine(&snapshots, None, &RiskAssessment::quiet())
            .unwrap();

        assert!(outcome.tie);
        assert_eq!(outcome.direction, Direction::Hold);
        assert!(outcome.confidence <= 60.0);
    }

    #[test]
    fn participation_moves_confidence_not_direction() {
        let combiner = combiner_with(&[("a", 0.6), ("b", 0.4)]);
        let snapshots = [
            snapshot("a", Direction::Sell, 80.0),
            snapshot("b", Direction::Buy, 60.0),
        ];
        let quiet = RiskAssessment::quiet();

        let base = combiner.combine(&snapshots, None, &quiet).unwrap();
        let strong = combiner
            .combine(&snapshots, Some(Participation::Strong), &quiet)
            .unwrap();
        let weak = combiner
            .combine(&snapshots, Some(Participation::Weak), &quiet)
            .unwrap();

        assert_eq!(base.direction, Direction::Sell);
        assert_eq!(strong.direction, Direction::Sell);
        assert_eq!(weak.direction, Direction::Sell);

        assert!(strong.confidence >= base.confidence);
        assert!(weak.confidence <= base.confidence);
        assert!(strong.confidence <= 95.0);
        assert!(weak.confidence >= 50.0);
    }

    #[test]
    fn no_surviving_providers_is_no_data() {
        let combiner = combiner_with(&[("a", 1.0)]);
        let result = combiner.combine(&[], None, &RiskAssessment::quiet());
        assert!(matches!(result, Err(PredictionError::NoDataAvailable(_))));
    }
}
