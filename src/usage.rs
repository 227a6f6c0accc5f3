use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable record of a start or stop transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub resource_id: String,
    pub action: UsageAction,
    pub timestamp: DateTime<Utc>,
    /// Position in the resource's event log, assigned by the store.
    /// Orders events that share a timestamp.
    #[serde(default)]
    pub sequence: u64,
    /// Hours of the run that just ended. Stop events only.
    pub duration: Option<Decimal>,
    /// Period cost snapshot taken at stop time. Stop events only.
    pub cost: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAction {
    Start,
    Stop,
}

impl std::fmt::Display for UsageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageAction::Start => write!(f, "start"),
            UsageAction::Stop => write!(f, "stop"),
        }
    }
}

impl UsageEvent {
    pub fn started(resource_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource_id.into(),
            action: UsageAction::Start,
            timestamp,
            sequence: 0,
            duration: None,
            cost: None,
        }
    }

    pub fn stopped(
        resource_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        duration: Decimal,
        cost: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource_id.into(),
            action: UsageAction::Stop,
            timestamp,
            sequence: 0,
            duration: Some(duration),
            cost: Some(cost),
        }
    }
}

/// Sorts newest first; ties on timestamp fall back to log position.
pub fn sort_newest_first(events: &mut [UsageEvent]) {
    events.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.sequence.cmp(&a.sequence))
    });
}
