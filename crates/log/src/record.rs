//! The printable log record.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::Level;

/// One structured log entry.
///
/// Records are immutable once built; derived loggers stamp `source` and
/// `context` before the record reaches writers and listeners.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    /// Severity of the entry.
    pub level: Level,
    /// Component that produced the entry, e.g. `task:app.fetch`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Human message.
    pub message: String,
    /// When the entry was produced.
    pub timestamp: DateTime<Utc>,
    /// Rendered error, when the entry reports a failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured payload attached by the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Ambient context bound to the emitting logger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl LogRecord {
    /// New record with the current timestamp and no attachments.
    #[must_use]
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        Self {
            level,
            source: None,
            message: message.into(),
            timestamp: Utc::now(),
            error: None,
            data: None,
            context: None,
        }
    }

    /// Attach a structured payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Attach a rendered error.
    #[must_use]
    pub fn with_error(mut self, error: impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Attach a source tag.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_without_empty_fields() {
        let record = LogRecord::new(Level::Info, "hello");
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["message"], "hello");
        assert!(json.get("error").is_none());
        assert!(json.get("data").is_none());
    }
}
