//! # Runner Log
//!
//! Structured logging for the Runner runtime.
//!
//! The kernel logs through a [`Logger`] that produces [`LogRecord`]s and
//! fans them out to pluggable [`LogWriter`]s and listeners. Printing is
//! gated by a [`Level`] threshold; listeners receive *every* record,
//! including those below the threshold, so log-consuming hooks never miss
//! data the console chose not to print.
//!
//! ```rust
//! use runner_log::{Logger, Level, PrintStrategy};
//!
//! let logger = Logger::builder()
//!     .threshold(Level::Info)
//!     .strategy(PrintStrategy::Plain)
//!     .build();
//! logger.info("boot complete");
//! ```
//!
//! Sibling crates use the re-exported [`tracing`] macros for internal
//! diagnostics; the structured [`Logger`] is what `run()` wires into the
//! application and exposes on the run result.

mod format;
mod level;
mod logger;
mod record;
mod writer;

pub use format::PrintStrategy;
pub use level::Level;
pub use logger::{Logger, LoggerBuilder};
pub use record::LogRecord;
pub use writer::{LogWriter, MemoryWriter, StderrWriter, StdoutWriter};

// Re-export tracing macros so sibling crates log through one facade.
pub use tracing::{debug, error, info, trace, warn};
