use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use prediction_core::{
    DataWindowSpec, Direction, PredictionError, SentimentAggregate, SentimentProvider,
    SignalProvider, SignalSnapshot,
};

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    symbol: &'a str,
    interval: &'a str,
    lookback_days: i64,
    anchor: String,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    direction: String,
    /// 0-100
    confidence: f64,
    #[allow(dead_code)]
    model_id: Option<String>,
}

/// HTTP adapter for a remote sequence-forecaster service.
///
/// The service is optional infrastructure: every transport or protocol
/// failure degrades to `ProviderUnavailable`, and the ensemble renormalizes
/// without it. Nothing here ever invents a stand-in prediction.
pub struct RemoteForecasterProvider {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteForecasterProvider {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, base_url }
    }
}

#[async_trait]
impl SignalProvider for RemoteForecasterProvider {
    fn provider_id(&self) -> &str {
        "sequence-forecaster"
    }

    async fn predict(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<SignalSnapshot, PredictionError> {
        let url = format!("{}/predict", self.base_url.trim_end_matches('/'));
        let request = PredictRequest {
            symbol,
            interval: &window.interval,
            lookback_days: window.lookback_days,
            anchor: window.anchor.to_rfc3339(),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                PredictionError::ProviderUnavailable(format!("forecaster unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            return Err(PredictionError::ProviderUnavailable(format!(
                "forecaster returned HTTP {}",
                response.status()
            )));
        }

        let body: PredictResponse = response.json().await.map_err(|e| {
            PredictionError::ProviderUnavailable(format!("bad forecaster response: {}", e))
        })?;

        let direction = Direction::from_str(&body.direction).ok_or_else(|| {
            PredictionError::ProviderUnavailable(format!(
                "forecaster returned unknown direction {:?}",
                body.direction
            ))
        })?;

        Ok(SignalSnapshot {
            provider_id: self.provider_id().to_string(),
            direction,
            confidence: body.confidence.clamp(0.0, 100.0),
        })
    }
}

/// HTTP adapter for a remote sentiment-analysis service. Serves both the
/// sentiment signal bridge and the risk guard's 72h dimension; like the
/// forecaster, any failure is `ProviderUnavailable` and both callers treat
/// that as absence, not as neutral sentiment.
pub struct RemoteSentimentProvider {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteSentimentProvider {
    pub fn new(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client, base_url }
    }
}

#[async_trait]
impl SentimentProvider for RemoteSentimentProvider {
    async fn analyze(
        &self,
        symbol: &str,
        window_hours: i64,
    ) -> Result<SentimentAggregate, PredictionError> {
        let url = format!(
            "{}/sentiment/{}?window_hours={}",
            self.base_url.trim_end_matches('/'),
            symbol.to_uppercase(),
            window_hours
        );

        let response = self.client.get(&url).send().await.map_err(|e| {
            PredictionError::ProviderUnavailable(format!("sentiment unreachable: {}", e))
        })?;

        if !response.status().is_success() {
            return Err(PredictionError::ProviderUnavailable(format!(
                "sentiment returned HTTP {}",
                response.status()
            )));
        }

        response.json::<SentimentAggregate>().await.map_err(|e| {
            PredictionError::ProviderUnavailable(format!("bad sentiment response: {}", e))
        })
    }
}
