use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};

use prediction_core::{EventCalendarProvider, EventRecord, EventSource, PredictionError};

/// How far behind today an event remains visible to callers. Covers the
/// widest sit-out buffer the guard applies.
const TRAILING_RETENTION_DAYS: i64 = 3;

/// Event calendar that merges an automatic feed with a manually curated
/// override list.
///
/// Manual entries win over feed entries for the same (type, date): a human
/// who bothered to file an override knows something the feed does not. Every
/// manual entry must carry a source URL so the sit-out decision it causes
/// can be audited later.
pub struct MergedEventCalendar {
    feed: Option<Arc<dyn EventCalendarProvider>>,
    overrides: Vec<EventRecord>,
}

impl MergedEventCalendar {
    pub fn new(feed: Option<Arc<dyn EventCalendarProvider>>) -> Self {
        Self {
            feed,
            overrides: Vec::new(),
        }
    }

    /// Add manual override events, rejecting unauditable entries.
    pub fn with_overrides(mut self, overrides: Vec<EventRecord>) -> Result<Self, PredictionError> {
        for event in &overrides {
            match &event.source {
                EventSource::Manual { source_url } if !source_url.trim().is_empty() => {}
                EventSource::Manual { .. } => {
                    return Err(PredictionError::InvalidConfig(format!(
                        "manual event {:?} for {} has no source URL",
                        event.title, event.symbol
                    )));
                }
                EventSource::Feed => {
                    return Err(PredictionError::InvalidConfig(format!(
                        "override list entry {:?} for {} is not marked manual",
                        event.title, event.symbol
                    )));
                }
            }
        }
        self.overrides = overrides;
        Ok(self)
    }

    /// Parse a JSON override file (an array of EventRecord).
    pub fn overrides_from_json(json: &str) -> Result<Vec<EventRecord>, PredictionError> {
        serde_json::from_str(json).map_err(|e| {
            PredictionError::InvalidConfig(format!("bad event override file: {}", e))
        })
    }

    // Events a few days behind today stay visible: a just-passed earnings
    // date is still inside its sit-out buffer.
    fn in_horizon(event: &EventRecord, today: NaiveDate, horizon_days: i64) -> bool {
        event.date >= today - Duration::days(TRAILING_RETENTION_DAYS)
            && event.date <= today + Duration::days(horizon_days)
    }
}

#[async_trait]
impl EventCalendarProvider for MergedEventCalendar {
    async fn upcoming_events(
        &self,
        symbol: &str,
        horizon_days: i64,
    ) -> Result<Vec<EventRecord>, PredictionError> {
        let symbol = symbol.to_uppercase();
        let today = Utc::now().date_naive();

        let mut events: Vec<EventRecord> = self
            .overrides
            .iter()
            .filter(|e| e.symbol.eq_ignore_ascii_case(&symbol))
            .filter(|e| Self::in_horizon(e, today, horizon_days))
            .cloned()
            .collect();

        if let Some(feed) = &self.feed {
            match feed.upcoming_events(&symbol, horizon_days).await {
                Ok(feed_events) => {
                    for event in feed_events {
                        let overridden = events.iter().any(|manual| {
                            manual.event_type == event.event_type && manual.date == event.date
                        });
                        if !overridden && Self::in_horizon(&event, today, horizon_days) {
                            events.push(event);
                        }
                    }
                }
                // A dead feed does not blind the guard to manual entries
                Err(e) => {
                    tracing::warn!("event feed unavailable for {}: {}", symbol, e);
                }
            }
        }

        events.sort_by_key(|e| e.date);
        Ok(events)
    }
}
