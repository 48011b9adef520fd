//! # Runner Resilience
//!
//! Concurrency primitives and resilience patterns for the Runner kernel.
//!
//! Two primitives carry the kernel's scheduling guarantees:
//!
//! - [`Queue`] — single-flight FIFO execution with deadlock detection and
//!   drain-or-cancel disposal.
//! - [`Semaphore`] — counting semaphore with FIFO fairness, weighted
//!   permits, and cancellation.
//!
//! On top of them sit the pattern state machines the built-in middleware
//! wraps around tasks: [`RetryStrategy`], [`timeout`], [`CircuitBreaker`],
//! [`TokenBucket`], [`Debouncer`] and [`Throttler`]. None of them know
//! anything about tasks or the store; the kernel adapts them.

mod circuit_breaker;
mod queue;
mod rate_limit;
mod retry;
mod semaphore;
mod temporal;
mod timeout;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use queue::{DisposeOptions, Queue, QueueEvent};
pub use rate_limit::TokenBucket;
pub use retry::{Backoff, RetryStrategy};
pub use semaphore::{Permit, Semaphore};
pub use temporal::{Debouncer, Throttler};
pub use timeout::timeout;
