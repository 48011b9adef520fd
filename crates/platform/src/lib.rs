//! # Runner Platform
//!
//! Host abstraction for the Runner kernel.
//!
//! The kernel never talks to the process directly; it goes through a
//! [`Platform`]: shutdown signals, panic notifications, environment
//! variables, timers, process exit, and task-local context storage (the
//! async-local-storage analogue used by the queue's deadlock detection and
//! the `require_context` middleware).
//!
//! Three concrete platforms ship:
//!
//! - [`TokioPlatform`] — a full OS process on the tokio runtime.
//! - [`NoopPlatform`] — everything fails with `PlatformUnsupported`;
//!   for embedding the kernel where the host owns the process.
//! - [`TestPlatform`] — injected env, recorded exits, manually
//!   triggerable signals.
//!
//! [`detect()`] picks the right one for the current host and honours the
//! `RUNNER_FORCE_NOOP_ALS` escape hatch (context storage forced to the
//! unsupported stub while everything else stays live).

mod context;
mod detect;
mod noop;
mod platform;
mod test_platform;
mod tokio_platform;

pub use context::ContextStorage;
pub use detect::{detect, EnvMode};
pub use noop::NoopPlatform;
pub use platform::{PanicInfoSnapshot, Platform, SignalBinding};
pub use test_platform::TestPlatform;
pub use tokio_platform::{TokioPlatform, FORCE_NOOP_ALS};
