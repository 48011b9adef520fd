//! Retry strategy with fixed and exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use runner_error::{RunnerError, RunnerResult};
use runner_log::debug;
use serde::{Deserialize, Serialize};

/// Backoff policy between attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Backoff {
    /// Fixed delay between attempts.
    Fixed {
        /// The delay, in milliseconds.
        delay_ms: u64,
    },
    /// `base * factor^(attempt-1)`, capped, with optional full jitter.
    Exponential {
        /// First-attempt delay, in milliseconds.
        base_ms: u64,
        /// Growth factor per attempt.
        factor: f64,
        /// Upper bound for any single delay, in milliseconds.
        max_ms: u64,
        /// Randomize each delay in `[0, calculated]`.
        #[serde(default)]
        jitter: bool,
    },
}

impl Backoff {
    fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential { base_ms, factor, max_ms, jitter } => {
                let raw = (*base_ms as f64) * factor.powi(attempt.saturating_sub(1) as i32);
                let capped = raw.min(*max_ms as f64) as u64;
                let ms = if *jitter { fastrand::u64(0..=capped) } else { capped };
                Duration::from_millis(ms)
            }
        }
    }
}

type StopPredicate = Arc<dyn Fn(&RunnerError) -> bool + Send + Sync>;

/// Retry loop configuration.
///
/// `stop_if` wins over retryability: when it returns true for an error the
/// loop stops immediately and surfaces that error.
#[derive(Clone)]
pub struct RetryStrategy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay policy between attempts.
    pub backoff: Backoff,
    stop_if: Option<StopPredicate>,
}

impl std::fmt::Debug for RetryStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryStrategy")
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .field("stop_if", &self.stop_if.is_some())
            .finish()
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_millis(100))
    }
}

impl RetryStrategy {
    /// Fixed-delay strategy.
    #[must_use]
    pub fn fixed(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Fixed { delay_ms: delay.as_millis() as u64 },
            stop_if: None,
        }
    }

    /// Exponential strategy: factor 2, capped at 30s, no jitter.
    #[must_use]
    pub fn exponential(attempts: u32, base: Duration) -> Self {
        Self {
            attempts,
            backoff: Backoff::Exponential {
                base_ms: base.as_millis() as u64,
                factor: 2.0,
                max_ms: 30_000,
                jitter: false,
            },
            stop_if: None,
        }
    }

    /// Stop retrying as soon as `predicate` matches the error.
    #[must_use]
    pub fn stop_if(mut self, predicate: impl Fn(&RunnerError) -> bool + Send + Sync + 'static) -> Self {
        self.stop_if = Some(Arc::new(predicate));
        self
    }

    /// Delay before re-running after a failed `attempt` (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }

    fn should_stop(&self, error: &RunnerError) -> bool {
        self.stop_if.as_ref().is_some_and(|stop| stop(error))
    }

    /// Run `operation` until it succeeds or attempts run out.
    ///
    /// The final error is the last attempt's error, untouched.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> RunnerResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RunnerResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if self.should_stop(&error) || attempt == attempts {
                        return Err(error);
                    }
                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        attempt,
                        of = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying after failure"
                    );
                    last_error = Some(error);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        // Unreachable: the loop always returns. Kept for totality.
        Err(last_error.unwrap_or(RunnerError::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let strategy = RetryStrategy::fixed(3, Duration::from_millis(1));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let value = strategy
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(RunnerError::task("transient"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn surfaces_last_error_when_exhausted() {
        let strategy = RetryStrategy::fixed(2, Duration::from_millis(1));
        let err = strategy
            .execute(|| async { Err::<(), _>(RunnerError::task("always")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "always");
    }

    #[tokio::test]
    async fn stop_predicate_short_circuits() {
        let strategy =
            RetryStrategy::fixed(5, Duration::from_millis(1)).stop_if(RunnerError::is_validation);
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        let err = strategy
            .execute(|| {
                let calls = Arc::clone(&calls_clone);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(RunnerError::validation("Task input", "t", "bad"))
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exponential_delays_grow_and_cap() {
        let backoff =
            Backoff::Exponential { base_ms: 100, factor: 2.0, max_ms: 350, jitter: false };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(350));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(350));
    }

    #[test]
    fn jittered_delay_stays_within_bound() {
        let backoff = Backoff::Exponential { base_ms: 64, factor: 2.0, max_ms: 1000, jitter: true };
        for attempt in 1..6 {
            assert!(backoff.delay_for(attempt) <= Duration::from_millis(1000));
        }
    }
}
