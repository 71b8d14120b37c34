//! Store model types.

use alert_core::Alert;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A persisted alert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRow {
    pub id: String,
    pub alert_type: String,
    pub system: String,
    pub message: String,
    pub timestamp: String,
    pub hostname: Option<String>,
    pub environment: Option<String>,
    pub received_at: String,
    pub created_at: Option<String>,
}

/// Input for inserting an alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAlertRow {
    pub id: String,
    pub alert_type: String,
    pub system: String,
    pub message: String,
    pub timestamp: String,
    pub hostname: String,
    pub environment: String,
    pub received_at: String,
}

impl NewAlertRow {
    /// Flatten an alert, stamping it with the local processing time.
    ///
    /// Missing metadata is stored as `"unknown"`.
    pub fn from_alert(alert: &Alert, received_at: DateTime<Utc>) -> Self {
        Self {
            id: alert.id.clone(),
            alert_type: alert.alert_type.as_str().to_string(),
            system: alert.system.clone(),
            message: alert.message.clone(),
            timestamp: alert.timestamp.clone(),
            hostname: alert.hostname().to_string(),
            environment: alert.environment().to_string(),
            received_at: received_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Result of an insert keyed by alert id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// First time this id was stored.
    Inserted,
    /// A row with this id already exists; nothing was written.
    Duplicate,
}

/// Number of stored alerts of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCount {
    pub alert_type: String,
    pub count: i64,
}

/// Consistent snapshot of store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertStats {
    pub total: i64,
    /// Ordered by count, highest first.
    pub by_type: Vec<TypeCount>,
}

impl AlertStats {
    /// Count for one type, 0 if none stored.
    pub fn count_for(&self, alert_type: &str) -> i64 {
        self.by_type
            .iter()
            .find(|c| c.alert_type == alert_type)
            .map(|c| c.count)
            .unwrap_or(0)
    }
}
