//! Circuit breaker: closed → open → half-open → closed.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use runner_error::{RunnerError, RunnerResult};
use runner_log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass; consecutive failures are counted.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open,
    /// A bounded number of probes test whether the target recovered.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Breaker tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub threshold: u32,
    /// How long the circuit stays open before probing.
    #[serde(rename = "cooldown_ms", with = "duration_ms")]
    pub cooldown: Duration,
    /// Concurrent probes allowed while half-open.
    pub half_open_probes: u32,
}

mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { threshold: 5, cooldown: Duration::from_secs(30), half_open_probes: 1 }
    }
}

#[derive(Debug)]
enum Inner {
    Closed { failures: u32 },
    Open { since: Instant },
    HalfOpen { probes_in_flight: u32 },
}

/// A single named circuit breaker.
///
/// `try_acquire` gates a call; the caller reports the outcome with
/// `record_success` / `record_failure`. State transitions happen inside
/// those three methods only.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// New breaker named `name` (used in errors and logs).
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self { name: name.into(), config, inner: Mutex::new(Inner::Closed { failures: 0 }) }
    }

    /// The breaker's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, with the open→half-open transition applied lazily.
    #[must_use]
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match *inner {
            Inner::Closed { .. } => CircuitState::Closed,
            Inner::Open { .. } => CircuitState::Open,
            Inner::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }

    fn refresh(&self, inner: &mut Inner) {
        if let Inner::Open { since } = *inner {
            if since.elapsed() >= self.config.cooldown {
                debug!(breaker = %self.name, "cooldown elapsed, probing");
                *inner = Inner::HalfOpen { probes_in_flight: 0 };
            }
        }
    }

    /// Gate one call. `Err(MiddlewareCircuitBreakerOpen)` while open or
    /// while the half-open probe budget is spent.
    pub fn try_acquire(&self) -> RunnerResult<()> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner);
        match &mut *inner {
            Inner::Closed { .. } => Ok(()),
            Inner::Open { since } => {
                let retry_after = self.config.cooldown.saturating_sub(since.elapsed());
                Err(RunnerError::MiddlewareCircuitBreakerOpen {
                    name: self.name.clone(),
                    retry_after: Some(retry_after),
                })
            }
            Inner::HalfOpen { probes_in_flight } => {
                if *probes_in_flight < self.config.half_open_probes {
                    *probes_in_flight += 1;
                    Ok(())
                } else {
                    Err(RunnerError::MiddlewareCircuitBreakerOpen {
                        name: self.name.clone(),
                        retry_after: None,
                    })
                }
            }
        }
    }

    /// Report a successful call. Closes a half-open circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match *inner {
            Inner::Closed { .. } => *inner = Inner::Closed { failures: 0 },
            Inner::HalfOpen { .. } => {
                debug!(breaker = %self.name, "probe succeeded, closing");
                *inner = Inner::Closed { failures: 0 };
            }
            Inner::Open { .. } => {}
        }
    }

    /// Report a failed call. Re-opens a half-open circuit immediately;
    /// opens a closed one at the threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::Closed { failures } => {
                *failures += 1;
                if *failures >= self.config.threshold {
                    warn!(breaker = %self.name, failures = *failures, "threshold reached, opening");
                    *inner = Inner::Open { since: Instant::now() };
                }
            }
            Inner::HalfOpen { .. } => {
                warn!(breaker = %self.name, "probe failed, re-opening");
                *inner = Inner::Open { since: Instant::now() };
            }
            Inner::Open { .. } => {}
        }
    }
}
