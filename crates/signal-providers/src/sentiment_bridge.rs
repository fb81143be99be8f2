use std::sync::Arc;

use async_trait::async_trait;

use prediction_core::{
    DataWindowSpec, Direction, PredictionError, SentimentProvider, SignalProvider, SignalSnapshot,
};

/// Compound score beyond which sentiment is directional rather than noise
const DIRECTIONAL_THRESHOLD: f64 = 0.15;

/// Exposes a sentiment collaborator as a directional signal provider.
///
/// A window with zero articles means the provider has nothing to say and
/// reports unavailable; it never votes on fabricated coverage.
pub struct SentimentSignalProvider {
    sentiment: Arc<dyn SentimentProvider>,
    window_hours: i64,
}

impl SentimentSignalProvider {
    pub fn new(sentiment: Arc<dyn SentimentProvider>, window_hours: i64) -> Self {
        Self {
            sentiment,
            window_hours,
        }
    }
}

#[async_trait]
impl SignalProvider for SentimentSignalProvider {
    fn provider_id(&self) -> &str {
        "sentiment"
    }

    async fn predict(
        &self,
        symbol: &str,
        _window: &DataWindowSpec,
    ) -> Result<SignalSnapshot, PredictionError> {
        let aggregate = self
            .sentiment
            .analyze(symbol, self.window_hours)
            .await
            .map_err(|e| PredictionError::ProviderUnavailable(e.to_string()))?;

        if aggregate.article_count == 0 {
            return Err(PredictionError::ProviderUnavailable(format!(
                "no articles for {} in the last {}h",
                symbol, self.window_hours
            )));
        }

        let direction = if aggregate.compound_score >= DIRECTIONAL_THRESHOLD {
            Direction::Buy
        } else if aggregate.compound_score <= -DIRECTIONAL_THRESHOLD {
            Direction::Sell
        } else {
            Direction::Hold
        };

        // Conviction tracks both score magnitude and the analyzer's own
        // confidence in its labels.
        let confidence =
            50.0 + aggregate.compound_score.abs().min(1.0) * aggregate.confidence * 45.0;

        Ok(SignalSnapshot {
            provider_id: self.provider_id().to_string(),
            direction,
            confidence: confidence.clamp(0.0, 100.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prediction_core::SentimentAggregate;

    struct Fixed(SentimentAggregate);

    #[async_trait]
    impl SentimentProvider for Fixed {
        async fn analyze(
            &self,
            _symbol: &str,
            _window_hours: i64,
        ) -> Result<SentimentAggregate, PredictionError> {
            Ok(self.0.clone())
        }
    }

    fn aggregate(compound: f64, articles: usize) -> SentimentAggregate {
        SentimentAggregate {
            label: "test".to_string(),
            compound_score: compound,
            confidence: 0.8,
            article_count: articles,
        }
    }

    #[tokio::test]
    async fn positive_coverage_votes_buy() {
        let provider = SentimentSignalProvider::new(Arc::new(Fixed(aggregate(0.4, 15))), 72);
        let window = prediction_core::Timeframe::EndOfDay.default_window(chrono::Utc::now());

        let snapshot = provider.predict("AAPL", &window).await.unwrap();
        assert_eq!(snapshot.direction, Direction::Buy);
        assert!(snapshot.confidence > 50.0);
    }

    #[tokio::test]
    async fn zero_articles_is_unavailable() {
        let provider = SentimentSignalProvider::new(Arc::new(Fixed(aggregate(0.9, 0))), 72);
        let window = prediction_core::Timeframe::EndOfDay.default_window(chrono::Utc::now());

        let result = provider.predict("AAPL", &window).await;
        assert!(matches!(
            result,
            Err(PredictionError::ProviderUnavailable(_))
        ));
    }
}
