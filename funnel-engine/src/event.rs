use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single cleaned event row, as handed over by ingestion.
/// Events may name steps that are not part of the funnel, those are dropped when journeys
/// are built.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Event {
    pub entity_id: String,
    pub event_name: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<String>,
}

impl Event {
    pub fn new(
        entity_id: impl Into<String>,
        event_name: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Event {
            entity_id: entity_id.into(),
            event_name: event_name.into(),
            timestamp,
            breakdown: None,
        }
    }

    pub fn with_breakdown(mut self, breakdown: impl Into<String>) -> Self {
        self.breakdown = Some(breakdown.into());
        self
    }
}
