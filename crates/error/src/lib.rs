//! # Runner Error
//!
//! The error taxonomy for the Runner orchestration runtime.
//!
//! Every failure the kernel can produce is a variant of [`RunnerError`],
//! carrying a stable [`code`](RunnerError::code) for programmatic handling
//! and a human message templated from its fields. Callers match on codes or
//! the `is_*` predicates rather than on message text.
//!
//! ```rust
//! use runner_error::RunnerError;
//!
//! let err = RunnerError::duplicate("Task", "app.fetch");
//! assert!(err.is_duplicate());
//! assert_eq!(err.code(), "DUPLICATE_REGISTRATION");
//! ```

mod error;

pub use error::{ErrorKind, RunnerError};

/// Result alias used across the Runner workspace.
pub type RunnerResult<T> = Result<T, RunnerError>;
