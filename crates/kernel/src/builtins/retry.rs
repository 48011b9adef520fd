//! Built-in retry middleware.

use std::time::Duration;

use runner_error::RunnerError;
use runner_resilience::RetryStrategy;
use serde::Deserialize;

use crate::builtins::parse_config;
use crate::definitions::{task_middleware, TaskMiddlewareDefinition};

/// Middleware id.
pub const RETRY: &str = "runner.middleware.retry";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetryConfig {
    /// Total attempts, including the first.
    attempts: u32,
    /// Base delay between attempts.
    delay_ms: u64,
    /// Growth factor; absent means fixed delay.
    factor: Option<f64>,
    /// Cap for any single delay.
    max_delay_ms: u64,
    /// Randomize delays in `[0, calculated]`.
    jitter: bool,
    /// Give up immediately on validation errors.
    stop_on_validation: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 100,
            factor: None,
            max_delay_ms: 30_000,
            jitter: false,
            stop_on_validation: true,
        }
    }
}

impl RetryConfig {
    fn strategy(&self) -> RetryStrategy {
        let mut strategy = match self.factor {
            Some(factor) => {
                let mut s =
                    RetryStrategy::exponential(self.attempts, Duration::from_millis(self.delay_ms));
                s.backoff = runner_resilience::Backoff::Exponential {
                    base_ms: self.delay_ms,
                    factor,
                    max_ms: self.max_delay_ms,
                    jitter: self.jitter,
                };
                s
            }
            None => RetryStrategy::fixed(self.attempts, Duration::from_millis(self.delay_ms)),
        };
        if self.stop_on_validation {
            strategy = strategy.stop_if(RunnerError::is_validation);
        }
        strategy
    }
}

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(RETRY)
        .run(|call, _deps, config| async move {
            let config: RetryConfig = parse_config(&config, RETRY)?;
            let strategy = config.strategy();
            strategy.execute(|| call.next(call.input.clone())).await
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_defaults_and_overrides() {
        let config: RetryConfig = parse_config(&serde_json::Value::Null, RETRY).unwrap();
        assert_eq!(config.attempts, 3);

        let config: RetryConfig =
            parse_config(&json!({"attempts": 5, "factor": 2.0}), RETRY).unwrap();
        assert_eq!(config.attempts, 5);
        assert_eq!(config.factor, Some(2.0));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = parse_config::<RetryConfig>(&json!({"attemps": 5}), RETRY).unwrap_err();
        assert!(err.is_validation());
    }
}
