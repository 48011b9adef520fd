//! Rendering strategies for log records.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::{Level, LogRecord};

/// How records are rendered for printing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintStrategy {
    /// Human-readable, colored when the terminal allows it.
    Pretty,
    /// Human-readable, never colored.
    Plain,
    /// One JSON object per line.
    Json,
    /// Indented JSON, for debugging sessions.
    JsonPretty,
}

impl PrintStrategy {
    /// Whether this strategy may use ANSI colors at all.
    ///
    /// `NO_COLOR` and non-TTY stdout further restrict the answer; that
    /// decision lives in the logger, which knows the environment.
    #[must_use]
    pub fn supports_color(self) -> bool {
        matches!(self, PrintStrategy::Pretty)
    }

    /// Render a record into a printable line (or block).
    #[must_use]
    pub fn render(self, record: &LogRecord, colors: bool) -> String {
        match self {
            PrintStrategy::Pretty | PrintStrategy::Plain => render_text(record, colors),
            PrintStrategy::Json => {
                serde_json::to_string(record).unwrap_or_else(|e| fallback_line(record, &e))
            }
            PrintStrategy::JsonPretty => {
                serde_json::to_string_pretty(record).unwrap_or_else(|e| fallback_line(record, &e))
            }
        }
    }
}

const RESET: &str = "\x1b[0m";
const DIM: &str = "\x1b[2m";

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Trace => "\x1b[90m",
        Level::Debug => "\x1b[36m",
        Level::Info => "\x1b[32m",
        Level::Warn => "\x1b[33m",
        Level::Error => "\x1b[31m",
        Level::Critical => "\x1b[1;31m",
    }
}

fn render_text(record: &LogRecord, colors: bool) -> String {
    let mut out = String::new();
    let ts = record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ");

    if colors {
        let _ = write!(
            out,
            "{DIM}{ts}{RESET} {}{:<8}{RESET}",
            level_color(record.level),
            record.level.tag()
        );
    } else {
        let _ = write!(out, "{ts} {:<8}", record.level.tag());
    }

    if let Some(source) = &record.source {
        let _ = write!(out, " [{source}]");
    }
    let _ = write!(out, " {}", record.message);

    if let Some(error) = &record.error {
        let _ = write!(out, "\n  error: {error}");
    }
    if let Some(data) = &record.data {
        let _ = write!(out, "\n  data: {data}");
    }
    if let Some(context) = &record.context {
        let _ = write!(out, "\n  context: {context}");
    }

    out
}

fn fallback_line(record: &LogRecord, err: &serde_json::Error) -> String {
    format!("{} {} (unserializable record: {err})", record.level.tag(), record.message)
}
