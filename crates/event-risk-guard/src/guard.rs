use std::sync::Arc;

use chrono::{DateTime, Utc};

use prediction_core::{
    Bar, EventCalendarProvider, EventRecord, EventType, PredictionError, RiskAssessment,
    RiskGuardConfig, SentimentProvider,
};

/// Relative weights of the risk dimensions. Event proximity dominates:
/// roughly 3x sentiment or volatility alone.
const EVENT_WEIGHT: f64 = 0.60;
const SENTIMENT_WEIGHT: f64 = 0.20;
const VOLATILITY_WEIGHT: f64 = 0.20;

/// How far below the sentiment threshold maps to a full-strength signal
const SENTIMENT_SPAN: f64 = 0.50;

pub struct RiskGuard {
    config: RiskGuardConfig,
    calendar: Arc<dyn EventCalendarProvider>,
    sentiment: Option<Arc<dyn SentimentProvider>>,
}

impl RiskGuard {
    pub fn new(
        config: RiskGuardConfig,
        calendar: Arc<dyn EventCalendarProvider>,
    ) -> Result<Self, PredictionError> {
        config.validate()?;
        Ok(Self {
            config,
            calendar,
            sentiment: None,
        })
    }

    /// Attach the optional sentiment collaborator. Without it the sentiment
    /// dimension simply stays quiet; it is never faked.
    pub fn with_sentiment(mut self, provider: Arc<dyn SentimentProvider>) -> Self {
        self.sentiment = Some(provider);
        self
    }

    pub fn config(&self) -> &RiskGuardConfig {
        &self.config
    }

    /// Run the full risk pass for one symbol. Runs once per generation;
    /// degraded collaborators reduce coverage, never fail the assessment.
    pub async fn assess(
        &self,
        symbol: &str,
        as_of: DateTime<Utc>,
        bars: &[Bar],
        benchmark_bars: &[Bar],
    ) -> RiskAssessment {
        // 1. Event discovery. Calendars that still return a just-passed
        //    event let the trailing side of its buffer gate as well.
        let lookahead = self.config.event_lookahead_days + self.config.earnings_buffer_days;
        let (nearest_event, days_to_event, in_sit_out) = match self
            .calendar
            .upcoming_events(symbol, lookahead)
            .await
        {
            Ok(events) => self.nearest_relevant(&events, as_of),
            Err(e) => {
                tracing::warn!("event discovery failed for {}: {}", symbol, e);
                (None, None, false)
            }
        };
        let event_score = match (&nearest_event, days_to_event) {
            // Hard window: date confidence no longer discounts it
            (Some(_), Some(_)) if in_sit_out => 1.0,
            (Some(event), Some(days)) if days <= self.config.event_lookahead_days => {
                let proximity =
                    1.0 - days as f64 / (self.config.event_lookahead_days + 1) as f64;
                proximity * event.date_confidence
            }
            _ => 0.0,
        };

        // 2. Rolling sentiment
        let rolling_sentiment = match &self.sentiment {
            Some(provider) => {
                match provider
                    .analyze(symbol, self.config.sentiment_window_hours)
                    .await
                {
                    Ok(agg) if agg.article_count > 0 => Some(agg.compound_score),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::debug!("sentiment unavailable for {}: {}", symbol, e);
                        None
                    }
                }
            }
            None => None,
        };
        let sentiment_score = match rolling_sentiment {
            Some(s) if s < self.config.negative_sentiment_threshold => {
                ((self.config.negative_sentiment_threshold - s) / SENTIMENT_SPAN).clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        // 3. Volatility spike: 10-day vs 30-day realized
        let spike_ratio = volatility_spike_ratio(bars);
        let volatility_score = match spike_ratio {
            Some(ratio) if ratio > self.config.volatility_spike_multiplier => {
                ((ratio - self.config.volatility_spike_multiplier)
                    / self.config.volatility_spike_multiplier)
                    .clamp(0.0, 1.0)
            }
            _ => 0.0,
        };

        // 4. Beta vs benchmark: sizing advice only, never a gate
        let beta = rolling_beta(bars, benchmark_bars);

        // 5. Weighted risk score; a sit-out window floors it at the
        //    forced-hold threshold regardless of the other dimensions.
        let mut risk_score = (EVENT_WEIGHT * event_score
            + SENTIMENT_WEIGHT * sentiment_score
            + VOLATILITY_WEIGHT * volatility_score)
            .clamp(0.0, 1.0);
        if in_sit_out {
            risk_score = risk_score.max(self.config.forced_hold_threshold);
        }

        // 6. Haircut ladder
        let haircut = self.config.haircut_for(risk_score);
        let forced_hold = risk_score >= self.config.forced_hold_threshold;

        let reason = self.describe(
            &nearest_event,
            days_to_event,
            in_sit_out,
            rolling_sentiment,
            sentiment_score,
            spike_ratio,
            volatility_score,
        );

        tracing::debug!(
            "{}: risk {:.2} (event {:.2}, sentiment {:.2}, vol {:.2}) haircut {:.0}%{}",
            symbol,
            risk_score,
            event_score,
            sentiment_score,
            volatility_score,
            haircut * 100.0,
            if forced_hold { ", forced hold" } else { "" }
        );

        RiskAssessment {
            risk_score,
            nearest_event,
            days_to_event,
            rolling_sentiment_72h: rolling_sentiment,
            volatility_spike_ratio: spike_ratio,
            beta_vs_benchmark: beta,
            haircut,
            forced_hold,
            reason,
        }
    }

    /// Pick the event that drives the risk score. Any event inside its
    /// sit-out buffer wins, whether just ahead or just behind; otherwise
    /// the nearest upcoming event. Days are signed: negative means the
    /// event date has already passed.
    fn nearest_relevant(
        &self,
        events: &[EventRecord],
        as_of: DateTime<Utc>,
    ) -> (Option<EventRecord>, Option<i64>, bool) {
        let today = as_of.date_naive();

        let gating = events
            .iter()
            .filter_map(|e| {
                let days = (e.date - today).num_days();
                let buffer = self.sit_out_buffer(&e.event_type)?;
                (days.abs() <= buffer).then_some((e, days))
            })
            .min_by_key(|(_, days)| days.abs());
        if let Some((event, days)) = gating {
            return (Some(event.clone()), Some(days), true);
        }

        events
            .iter()
            .filter(|e| e.date >= today)
            .min_by_key(|e| e.date)
            .map(|e| {
                let days = (e.date - today).num_days();
                (Some(e.clone()), Some(days), false)
            })
            .unwrap_or((None, None, false))
    }

    fn sit_out_buffer(&self, event_type: &EventType) -> Option<i64> {
        match event_type {
            EventType::Earnings | EventType::RegulatoryDisclosure => {
                Some(self.config.earnings_buffer_days)
            }
            EventType::DividendExDate => Some(self.config.dividend_buffer_days),
            EventType::Other(_) => None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn describe(
        &self,
        nearest_event: &Option<EventRecord>,
        days_to_event: Option<i64>,
        in_sit_out: bool,
        sentiment: Option<f64>,
        sentiment_score: f64,
        spike_ratio: Option<f64>,
        volatility_score: f64,
    ) -> String {
        let mut parts = Vec::new();

        if let (Some(event), Some(days)) = (nearest_event, days_to_event) {
            let when = if days < 0 {
                format!("{} day(s) ago", -days)
            } else {
                format!("in {} day(s)", days)
            };
            if in_sit_out {
                parts.push(format!(
                    "{} {} (sit-out window)",
                    event.event_type.as_str(),
                    when
                ));
            } else if days <= self.config.event_lookahead_days {
                parts.push(format!("{} {}", event.event_type.as_str(), when));
            }
        }
        if sentiment_score > 0.0 {
            if let Some(s) = sentiment {
                parts.push(format!("negative 72h sentiment ({:.2})", s));
            }
        }
        if volatility_score > 0.0 {
            if let Some(ratio) = spike_ratio {
                parts.push(format!("volatility spike {:.2}x", ratio));
            }
        }

        if parts.is_empty() {
            "no elevated risk signals".to_string()
        } else {
            parts.join("; ")
        }
    }
}

fn daily_returns(bars: &[Bar]) -> Vec<f64> {
    bars.windows(2)
        .filter(|w| w[0].close != 0.0)
        .map(|w| (w[1].close - w[0].close) / w[0].close)
        .collect()
}

fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// 10-day over 30-day realized volatility. None when there is not enough
/// history for the long leg.
pub fn volatility_spike_ratio(bars: &[Bar]) -> Option<f64> {
    let returns = daily_returns(bars);
    if returns.len() < 30 {
        return None;
    }

    let long = std_dev(&returns[returns.len() - 30..])?;
    let short = std_dev(&returns[returns.len() - 10..])?;
    if long == 0.0 {
        return None;
    }
    Some(short / long)
}

/// Rolling regression beta of the symbol's returns against the benchmark,
/// over the aligned tail of both series.
pub fn rolling_beta(bars: &[Bar], benchmark_bars: &[Bar]) -> Option<f64> {
    let sym = daily_returns(bars);
    let bench = daily_returns(benchmark_bars);
    let n = sym.len().min(bench.len());
    if n < 20 {
        return None;
    }

    let sym = &sym[sym.len() - n..];
    let bench = &bench[bench.len() - n..];

    let sym_mean = sym.iter().sum::<f64>() / n as f64;
    let bench_mean = bench.iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var = 0.0;
    for i in 0..n {
        cov += (sym[i] - sym_mean) * (bench[i] - bench_mean);
        var += (bench[i] - bench_mean).powi(2);
    }
    if var == 0.0 {
        return None;
    }
    Some(cov / var)
}
