use std::sync::Arc;

use async_trait::async_trait;

use prediction_core::{
    Bar, DataWindowSpec, Direction, MarketDataProvider, Participation, PredictionError,
    SignalProvider, SignalSnapshot,
};

const SHORT_SMA: usize = 10;
const LONG_SMA: usize = 30;
const RSI_PERIOD: usize = 14;

fn sma(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period {
        return None;
    }
    let tail = &bars[bars.len() - period..];
    Some(tail.iter().map(|b| b.close).sum::<f64>() / period as f64)
}

fn rsi(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.len() < period + 1 {
        return None;
    }
    let tail = &bars[bars.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in tail.windows(2) {
        let change = w[1].close - w[0].close;
        if change >= 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = (gains / period as f64) / (losses / period as f64);
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Recent volume participation vs the 30-day average. Feeds the combiner's
/// confidence-only adjustment; None when the history is too thin to judge.
pub fn participation_from_bars(bars: &[Bar]) -> Option<Participation> {
    if bars.len() < 30 {
        return None;
    }
    let long_avg =
        bars[bars.len() - 30..].iter().map(|b| b.volume).sum::<f64>() / 30.0;
    let recent_avg = bars[bars.len() - 5..].iter().map(|b| b.volume).sum::<f64>() / 5.0;
    if long_avg <= 0.0 {
        return None;
    }

    let ratio = recent_avg / long_avg;
    if ratio >= 1.4 {
        Some(Participation::Strong)
    } else if ratio <= 0.7 {
        Some(Participation::Weak)
    } else {
        Some(Participation::Normal)
    }
}

/// Trend/momentum heuristic: SMA cross plus volatility-normalized momentum.
pub struct MomentumProvider {
    market_data: Arc<dyn MarketDataProvider>,
}

impl MomentumProvider {
    pub fn new(market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self { market_data }
    }
}

#[async_trait]
impl SignalProvider for MomentumProvider {
    fn provider_id(&self) -> &str {
        "momentum"
    }

    async fn predict(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<SignalSnapshot, PredictionError> {
        let bars = self.market_data.history(symbol, window).await?;

        let short = sma(&bars, SHORT_SMA);
        let long = sma(&bars, LONG_SMA);
        let (short, long) = match (short, long) {
            (Some(s), Some(l)) => (s, l),
            _ => {
                return Err(PredictionError::ProviderUnavailable(format!(
                    "momentum needs {} bars, got {}",
                    LONG_SMA,
                    bars.len()
                )))
            }
        };

        // Spread of the fast average over the slow one, as a fraction
        let spread = (short - long) / long;
        let direction = if spread > 0.005 {
            Direction::Buy
        } else if spread < -0.005 {
            Direction::Sell
        } else {
            Direction::Hold
        };

        // 2% spread saturates conviction
        let conviction = (spread.abs() / 0.02).clamp(0.0, 1.0);
        let confidence = 50.0 + conviction * 40.0;

        Ok(SignalSnapshot {
            provider_id: self.provider_id().to_string(),
            direction,
            confidence,
        })
    }
}

/// Technical-indicator voter: RSI, SMA cross, and 20-day breakout each cast
/// one vote; the majority wins and unanimity raises conviction.
pub struct IndicatorVoterProvider {
    market_data: Arc<dyn MarketDataProvider>,
}

impl IndicatorVoterProvider {
    pub fn new(market_data: Arc<dyn MarketDataProvider>) -> Self {
        Self { market_data }
    }
}

#[async_trait]
impl SignalProvider for IndicatorVoterProvider {
    fn provider_id(&self) -> &str {
        "indicator-voter"
    }

    async fn predict(
        &self,
        symbol: &str,
        window: &DataWindowSpec,
    ) -> Result<SignalSnapshot, PredictionError> {
        let bars = self.market_data.history(symbol, window).await?;
        if bars.len() < LONG_SMA + 1 {
            return Err(PredictionError::ProviderUnavailable(format!(
                "indicator voter needs {} bars, got {}",
                LONG_SMA + 1,
                bars.len()
            )));
        }

        let last_close = bars.last().map(|b| b.close).unwrap_or(0.0);
        let mut votes: i32 = 0;

        if let Some(rsi) = rsi(&bars, RSI_PERIOD) {
            if rsi < 30.0 {
                votes += 1; // oversold
            } else if rsi > 70.0 {
                votes -= 1; // overbought
            }
        }

        if let (Some(short), Some(long)) = (sma(&bars, SHORT_SMA), sma(&bars, LONG_SMA)) {
            if short > long {
                votes += 1;
            } else if short < long {
                votes -= 1;
            }
        }

        // 20-day breakout
        let lookback = &bars[bars.len().saturating_sub(21)..bars.len() - 1];
        let high = lookback.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = lookback.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        if last_close > high {
            votes += 1;
        } else if last_close < low {
            votes -= 1;
        }

        let direction = if votes > 0 {
            Direction::Buy
        } else if votes < 0 {
            Direction::Sell
        } else {
            Direction::Hold
        };
        let confidence = 50.0 + (votes.abs() as f64) * 13.0;

        Ok(SignalSnapshot {
            provider_id: self.provider_id().to_string(),
            direction,
            confidence: confidence.min(95.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use prediction_core::Timeframe;

    struct FixedBars(Vec<Bar>);

    #[async_trait]
    impl MarketDataProvider for FixedBars {
        async fn history(
            &self,
            _symbol: &str,
            _window: &DataWindowSpec,
        ) -> Result<Vec<Bar>, PredictionError> {
            Ok(self.0.clone())
        }

        async fn quote(&self, _symbol: &str) -> Result<f64, PredictionError> {
            Ok(self.0.last().map(|b| b.close).unwrap_or(0.0))
        }

        async fn closing_price(
            &self,
            _symbol: &str,
            _date: chrono::NaiveDate,
        ) -> Result<f64, PredictionError> {
            Err(PredictionError::NoDataAvailable("test".to_string()))
        }
    }

    fn trending_bars(n: usize, daily_pct: f64) -> Vec<Bar> {
        let mut close = 100.0;
        (0..n)
            .map(|i| {
                close *= 1.0 + daily_pct;
                Bar {
                    timestamp: Utc::now() - Duration::days((n - i) as i64),
                    open: close * 0.999,
                    high: close * 1.001,
                    low: close * 0.998,
                    close,
                    volume: 1_000_000.0,
                }
            })
            .collect()
    }

    fn window() -> DataWindowSpec {
        Timeframe::EndOfDay.default_window(Utc::now())
    }

    #[tokio::test]
    async fn uptrend_reads_as_buy() {
        let provider = MomentumProvider::new(Arc::new(FixedBars(trending_bars(60, 0.01))));
        let snapshot = provider.predict("AAPL", &window()).await.unwrap();

        assert_eq!(snapshot.direction, Direction::Buy);
        assert!(snapshot.confidence > 50.0);
    }

    #[tokio::test]
    async fn downtrend_reads_as_sell() {
        let provider = MomentumProvider::new(Arc::new(FixedBars(trending_bars(60, -0.01))));
        let snapshot = provider.predict("AAPL", &window()).await.unwrap();
        assert_eq!(snapshot.direction, Direction::Sell);
    }

    #[tokio::test]
    async fn thin_history_is_unavailable_not_fabricated() {
        let provider = MomentumProvider::new(Arc::new(FixedBars(trending_bars(5, 0.01))));
        let result = provider.predict("AAPL", &window()).await;
        assert!(matches!(
            result,
            Err(PredictionError::ProviderUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn voter_follows_a_strong_trend() {
        let provider = IndicatorVoterProvider::new(Arc::new(FixedBars(trending_bars(60, 0.012))));
        let snapshot = provider.predict("AAPL", &window()).await.unwrap();

        // SMA cross and breakout both vote up; RSI votes down (overbought).
        // Net is still bullish.
        assert_eq!(snapshot.direction, Direction::Buy);
    }

    #[test]
    fn participation_flags_volume_surges() {
        let mut bars = trending_bars(40, 0.0);
        let n = bars.len();
        for bar in &mut bars[n - 5..] {
            bar.volume = 5_000_000.0;
        }
        assert_eq!(participation_from_bars(&bars), Some(Participation::Strong));

        for bar in &mut bars[n - 5..] {
            bar.volume = 100_000.0;
        }
        assert_eq!(participation_from_bars(&bars), Some(Participation::Weak));

        assert_eq!(participation_from_bars(&bars[..20]), None);
    }
}
