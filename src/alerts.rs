//! Alert model and reconciliation.
//!
//! Alerts arrive in classifier responses and are deduplicated by their
//! identity key `(type, title)` before display. The key set lives in the
//! [`Session`](crate::session::Session); the feed here only holds what is
//! currently visible, most recent first.

use serde::{Deserialize, Serialize};

use crate::session::Session;

/// Category of a flagged issue, spelled as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Pressure,
    Jargon,
    MultiQuestion,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Pressure => "PRESSURE",
            AlertType::Jargon => "JARGON",
            AlertType::MultiQuestion => "MULTI_QUESTION",
        }
    }
}

/// Identity key for deduplication: two alerts with the same type and title
/// are the same alert, whatever their message text says.
pub type AlertKey = (AlertType, String);

/// One flagged issue. Immutable once created; the reconciler inserts or
/// discards, never edits in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub title: String,
    pub message: String,
    pub suggestion: String,
}

impl Alert {
    pub fn key(&self) -> AlertKey {
        (self.alert_type, self.title.clone())
    }
}

/// The visible alert collection, most recent first.
#[derive(Debug, Default)]
pub struct AlertFeed {
    alerts: Vec<Alert>,
}

impl AlertFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one response's alerts into the feed.
    ///
    /// Each alert passes through `Session::mark_alert_shown`, the sole
    /// deduplication gate. Newly shown alerts are inserted at the front and
    /// returned (in insertion order) for the UI surface; duplicates are
    /// dropped entirely.
    pub fn reconcile(&mut self, session: &mut Session, incoming: &[Alert]) -> Vec<Alert> {
        let mut shown = Vec::new();
        for alert in incoming {
            if session.mark_alert_shown(alert.key()) {
                self.alerts.insert(0, alert.clone());
                shown.push(alert.clone());
            } else {
                log::debug!(
                    "Duplicate alert dropped: {} / {:?}",
                    alert.title,
                    alert.alert_type
                );
            }
        }
        shown
    }

    pub fn clear(&mut self) {
        self.alerts.clear();
    }

    /// Visible alerts, most recent first.
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }
}
