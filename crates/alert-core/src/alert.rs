//! The alert record exchanged over the queue.
//!
//! Alerts travel as UTF-8 JSON:
//!
//! ```json
//! {
//!   "id": "ALERT-1718000000000-42",
//!   "type": "CRITICAL",
//!   "system": "Payments",
//!   "message": "Payments is not responding",
//!   "timestamp": "2024-06-10T06:13:20.000Z",
//!   "metadata": { "hostname": "server-3", "environment": "production" }
//! }
//! ```
//!
//! `id` is the idempotency key. `metadata` and both of its fields are optional.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Sentinel stored when an alert carries no hostname or environment.
pub const UNKNOWN_METADATA: &str = "unknown";

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    Critical,
    Warning,
    Info,
    Error,
}

impl AlertType {
    /// All alert types, in catalog order.
    pub const ALL: [AlertType; 4] = [
        AlertType::Critical,
        AlertType::Warning,
        AlertType::Info,
        AlertType::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = AlertParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(Self::Critical),
            "WARNING" => Ok(Self::Warning),
            "INFO" => Ok(Self::Info),
            "ERROR" => Ok(Self::Error),
            other => Err(AlertParseError::Invalid(format!("unknown alert type {other:?}"))),
        }
    }
}

/// Free-form origin details attached by the producer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// An alert event. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub system: String,
    pub message: String,
    /// ISO-8601 creation time exactly as the producer wrote it.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<AlertMetadata>,
}

/// Reasons a payload is not a usable alert.
#[derive(Error, Debug)]
pub enum AlertParseError {
    /// Payload bytes are not UTF-8
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// Payload is not a JSON alert
    #[error("Invalid alert JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload parsed but violates the alert contract
    #[error("Invalid alert: {0}")]
    Invalid(String),
}

impl Alert {
    /// Build an alert id of the form `ALERT-<epoch-millis>-<suffix>`.
    pub fn make_id(at: DateTime<Utc>, suffix: u16) -> String {
        format!("ALERT-{}-{}", at.timestamp_millis(), suffix % 1000)
    }

    /// Format a creation time the way producers put it on the wire.
    pub fn format_timestamp(at: DateTime<Utc>) -> String {
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Decode an alert from a queue payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, AlertParseError> {
        let text = std::str::from_utf8(payload)?;
        let alert: Alert = serde_json::from_str(text)?;
        if alert.id.trim().is_empty() {
            return Err(AlertParseError::Invalid("alert id is empty".to_string()));
        }
        if !is_iso8601(&alert.timestamp) {
            return Err(AlertParseError::Invalid(format!(
                "timestamp {:?} is not ISO-8601",
                alert.timestamp
            )));
        }
        Ok(alert)
    }

    /// Encode the alert as a queue payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Hostname, or [`UNKNOWN_METADATA`] when absent or empty.
    pub fn hostname(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.hostname.as_deref())
            .filter(|h| !h.is_empty())
            .unwrap_or(UNKNOWN_METADATA)
    }

    /// Environment, or [`UNKNOWN_METADATA`] when absent or empty.
    pub fn environment(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.environment.as_deref())
            .filter(|e| !e.is_empty())
            .unwrap_or(UNKNOWN_METADATA)
    }
}

/// RFC 3339 with an offset, or a local date-time without one.
fn is_iso8601(raw: &str) -> bool {
    DateTime::parse_from_rfc3339(raw).is_ok()
        || NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}
