//! The logger: threshold gating, fan-out to writers and listeners.

use std::io::IsTerminal as _;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::{Level, LogRecord, LogWriter, PrintStrategy, StdoutWriter};

type Listener = Arc<dyn Fn(&LogRecord) + Send + Sync>;

struct LoggerCore {
    /// Minimum level that gets printed. `None` prints nothing.
    threshold: Option<Level>,
    strategy: PrintStrategy,
    colors: bool,
    writers: Vec<Arc<dyn LogWriter>>,
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_listener_id: std::sync::atomic::AtomicU64,
}

/// Structured logger with pluggable writers and listeners.
///
/// Cloning is cheap and derived loggers (`with_source`, `with_context`)
/// share the same core: one threshold, one writer set, one listener
/// registry. Listeners observe every record regardless of threshold.
#[derive(Clone)]
pub struct Logger {
    core: Arc<LoggerCore>,
    source: Option<String>,
    context: Option<Value>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("threshold", &self.core.threshold)
            .field("strategy", &self.core.strategy)
            .field("source", &self.source)
            .finish()
    }
}

impl Logger {
    /// Start building a logger.
    #[must_use]
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::default()
    }

    /// A logger that prints nothing but still feeds listeners.
    #[must_use]
    pub fn silent() -> Self {
        Self::builder().silent().build()
    }

    /// The configured print threshold, if printing is enabled.
    #[must_use]
    pub fn threshold(&self) -> Option<Level> {
        self.core.threshold
    }

    /// The configured print strategy.
    #[must_use]
    pub fn strategy(&self) -> PrintStrategy {
        self.core.strategy
    }

    /// Derived logger stamping `source` on every record it emits.
    #[must_use]
    pub fn with_source(&self, source: impl Into<String>) -> Self {
        Self { core: Arc::clone(&self.core), source: Some(source.into()), context: self.context.clone() }
    }

    /// Derived logger stamping ambient `context` on every record.
    #[must_use]
    pub fn with_context(&self, context: Value) -> Self {
        Self { core: Arc::clone(&self.core), source: self.source.clone(), context: Some(context) }
    }

    /// Subscribe to every record. Returns an id usable with
    /// [`Logger::remove_listener`].
    pub fn on_record(&self, listener: impl Fn(&LogRecord) + Send + Sync + 'static) -> u64 {
        let id = self
            .core
            .next_listener_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.core.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Detach a listener registered with [`Logger::on_record`].
    pub fn remove_listener(&self, id: u64) {
        self.core.listeners.write().retain(|(lid, _)| *lid != id);
    }

    /// Emit a full record: listeners always, writers when at or above the
    /// threshold.
    pub fn log(&self, mut record: LogRecord) {
        if record.source.is_none() {
            record.source = self.source.clone();
        }
        if record.context.is_none() {
            record.context = self.context.clone();
        }

        let listeners = self.core.listeners.read().clone();
        for (_, listener) in &listeners {
            listener(&record);
        }

        let Some(threshold) = self.core.threshold else { return };
        if record.level < threshold {
            return;
        }
        let line = self.core.strategy.render(&record, self.core.colors);
        for writer in &self.core.writers {
            writer.write_line(&line);
        }
    }

    /// Emit a message at `level`.
    pub fn log_message(&self, level: Level, message: impl Into<String>) {
        self.log(LogRecord::new(level, message));
    }

    /// Emit at trace level.
    pub fn trace(&self, message: impl Into<String>) {
        self.log_message(Level::Trace, message);
    }

    /// Emit at debug level.
    pub fn debug(&self, message: impl Into<String>) {
        self.log_message(Level::Debug, message);
    }

    /// Emit at info level.
    pub fn info(&self, message: impl Into<String>) {
        self.log_message(Level::Info, message);
    }

    /// Emit at warn level.
    pub fn warn(&self, message: impl Into<String>) {
        self.log_message(Level::Warn, message);
    }

    /// Emit at error level.
    pub fn error(&self, message: impl Into<String>) {
        self.log_message(Level::Error, message);
    }

    /// Emit at critical level.
    pub fn critical(&self, message: impl Into<String>) {
        self.log_message(Level::Critical, message);
    }
}

/// Builder for [`Logger`].
#[derive(Default)]
pub struct LoggerBuilder {
    threshold: Option<Option<Level>>,
    strategy: Option<PrintStrategy>,
    colors: Option<bool>,
    writers: Vec<Arc<dyn LogWriter>>,
}

impl LoggerBuilder {
    /// Print records at or above `level`.
    #[must_use]
    pub fn threshold(mut self, level: Level) -> Self {
        self.threshold = Some(Some(level));
        self
    }

    /// Print nothing; listeners still observe records.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.threshold = Some(None);
        self
    }

    /// Select the print strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: PrintStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Force colors on or off, bypassing TTY/`NO_COLOR` detection.
    #[must_use]
    pub fn colors(mut self, colors: bool) -> Self {
        self.colors = Some(colors);
        self
    }

    /// Add a writer. When none are added, stdout is used.
    #[must_use]
    pub fn writer(mut self, writer: Arc<dyn LogWriter>) -> Self {
        self.writers.push(writer);
        self
    }

    /// Finish the logger.
    #[must_use]
    pub fn build(self) -> Logger {
        let strategy = self.strategy.unwrap_or(PrintStrategy::Pretty);
        let colors = self.colors.unwrap_or_else(|| {
            strategy.supports_color()
                && std::env::var_os("NO_COLOR").is_none()
                && std::io::stdout().is_terminal()
        });
        let writers = if self.writers.is_empty() {
            vec![Arc::new(StdoutWriter) as Arc<dyn LogWriter>]
        } else {
            self.writers
        };

        Logger {
            core: Arc::new(LoggerCore {
                threshold: self.threshold.unwrap_or(Some(Level::Info)),
                strategy,
                colors,
                writers,
                listeners: RwLock::new(Vec::new()),
                next_listener_id: std::sync::atomic::AtomicU64::new(0),
            }),
            source: None,
            context: None,
        }
    }
}
