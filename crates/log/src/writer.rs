//! Pluggable sinks for rendered log lines.

use std::io::Write as _;

use parking_lot::Mutex;

/// A destination for rendered log lines.
pub trait LogWriter: Send + Sync {
    /// Write one rendered line (no trailing newline).
    fn write_line(&self, line: &str);
}

/// Writes to stdout, one line per record.
#[derive(Debug, Default)]
pub struct StdoutWriter;

impl LogWriter for StdoutWriter {
    fn write_line(&self, line: &str) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        let _ = writeln!(handle, "{line}");
    }
}

/// Writes to stderr, one line per record.
#[derive(Debug, Default)]
pub struct StderrWriter;

impl LogWriter for StderrWriter {
    fn write_line(&self, line: &str) {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "{line}");
    }
}

/// Collects lines in memory. Intended for tests and dry-run captures.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    lines: Mutex<Vec<String>>,
}

impl MemoryWriter {
    /// New empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Drop all captured lines.
    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl LogWriter for MemoryWriter {
    fn write_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_writer_captures_in_order() {
        let writer = MemoryWriter::new();
        writer.write_line("one");
        writer.write_line("two");
        assert_eq!(writer.lines(), vec!["one", "two"]);
        writer.clear();
        assert!(writer.lines().is_empty());
    }
}
