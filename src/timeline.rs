//! Timeline of conversation summaries.
//!
//! Every analysis response that survives sequencing produces exactly one
//! timestamped, severity-tagged event. The log is append-only: events are
//! never merged, edited, or removed.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::alerts::{Alert, AlertType};

/// Severity of a timeline event, spelled as on the wire.
///
/// Derived from the alerts accompanying a summary; precedence is
/// `pressure > jargon > multi_question > neutral`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Pressure,
    Jargon,
    MultiQuestion,
    Neutral,
}

impl Severity {
    /// Highest-precedence alert type present, or `Neutral` for none.
    pub fn from_alerts(alerts: &[Alert]) -> Self {
        let mut severity = Severity::Neutral;
        for alert in alerts {
            let candidate = match alert.alert_type {
                AlertType::Pressure => Severity::Pressure,
                AlertType::Jargon => Severity::Jargon,
                AlertType::MultiQuestion => Severity::MultiQuestion,
            };
            if candidate.rank() < severity.rank() {
                severity = candidate;
            }
        }
        severity
    }

    fn rank(&self) -> u8 {
        match self {
            Severity::Pressure => 0,
            Severity::Jargon => 1,
            Severity::MultiQuestion => 2,
            Severity::Neutral => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Pressure => "pressure",
            Severity::Jargon => "jargon",
            Severity::MultiQuestion => "multi_question",
            Severity::Neutral => "neutral",
        }
    }
}

/// One summarized chunk of conversation.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineEvent {
    pub summary: String,
    pub severity: Severity,
    /// Absolute instant of event creation. Formatting for display happens
    /// at the UI boundary, not here.
    pub timestamp: DateTime<Utc>,
}

impl TimelineEvent {
    pub fn new(summary: String, severity: Severity) -> Self {
        Self {
            summary,
            severity,
            timestamp: Utc::now(),
        }
    }

    /// Local wall-clock time for display.
    pub fn display_time(&self) -> String {
        self.timestamp
            .with_timezone(&Local)
            .format("%H:%M:%S")
            .to_string()
    }
}

/// Append-only, creation-ordered event log.
#[derive(Debug, Default)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: TimelineEvent) {
        self.events.push(event);
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
