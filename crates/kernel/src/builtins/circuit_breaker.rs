//! Built-in circuit-breaker middleware.

use std::time::Duration;

use runner_resilience::CircuitBreakerConfig;
use serde::Deserialize;

use crate::builtins::resources::{CircuitBreakers, CIRCUIT_BREAKER};
use crate::builtins::parse_config;
use crate::definitions::{task_middleware, DependencyRef, TaskMiddlewareDefinition};

/// Middleware id.
pub const CIRCUIT_BREAKER_MW: &str = "runner.middleware.circuit_breaker";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BreakerConfig {
    /// Consecutive failures before opening.
    threshold: u32,
    /// How long the circuit stays open.
    cooldown_ms: u64,
    /// Concurrent probes allowed while half-open.
    half_open_probes: u32,
    /// Breaker name; defaults to the task id.
    name: Option<String>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self { threshold: 5, cooldown_ms: 30_000, half_open_probes: 1, name: None }
    }
}

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(CIRCUIT_BREAKER_MW)
        .dependencies([DependencyRef::resource(CIRCUIT_BREAKER)])
        .run(|call, deps, config| async move {
            let config: BreakerConfig = parse_config(&config, CIRCUIT_BREAKER_MW)?;
            let breakers = deps.resource::<CircuitBreakers>(CIRCUIT_BREAKER)?;
            let name = config.name.unwrap_or_else(|| call.task.id.to_string());
            let breaker = breakers.get_or_create(
                &name,
                CircuitBreakerConfig {
                    threshold: config.threshold,
                    cooldown: Duration::from_millis(config.cooldown_ms),
                    half_open_probes: config.half_open_probes,
                },
            );

            breaker.try_acquire()?;
            match call.next(call.input.clone()).await {
                Ok(output) => {
                    breaker.record_success();
                    Ok(output)
                }
                Err(error) => {
                    breaker.record_failure();
                    Err(error)
                }
            }
        })
        .build()
}
