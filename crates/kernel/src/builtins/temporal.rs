//! Built-in debounce and throttle middleware, backed by the temporal
//! pools.

use runner_error::RunnerError;
use serde::Deserialize;
use serde_json::Value;

use crate::builtins::resources::{TemporalPools, TEMPORAL};
use crate::builtins::parse_config;
use crate::definitions::{task_middleware, DependencyRef, TaskMiddlewareDefinition};

/// Debounce middleware id.
pub const DEBOUNCE: &str = "runner.middleware.debounce";
/// Throttle middleware id.
pub const THROTTLE: &str = "runner.middleware.throttle";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TemporalConfig {
    /// Window length in milliseconds.
    ms: u64,
    /// JSON pointer into the input partitioning the window key; the task
    /// id is always part of the key.
    key: Option<String>,
}

impl Default for TemporalConfig {
    fn default() -> Self {
        Self { ms: 250, key: None }
    }
}

fn window_key(task_id: &str, config: &TemporalConfig, input: &Value) -> String {
    match &config.key {
        Some(pointer) => {
            let partition = input
                .pointer(pointer)
                .map(ToString::to_string)
                .unwrap_or_else(|| "(none)".to_string());
            format!("{task_id}:{partition}")
        }
        None => task_id.to_string(),
    }
}

/// Debounce: only the latest call in a quiet window executes; superseded
/// calls resolve to `null`.
pub(crate) fn debounce_definition() -> TaskMiddlewareDefinition {
    task_middleware(DEBOUNCE)
        .dependencies([DependencyRef::resource(TEMPORAL)])
        .run(|call, deps, config| async move {
            let config: TemporalConfig = parse_config(&config, DEBOUNCE)?;
            let pools = deps.resource::<TemporalPools>(TEMPORAL)?;
            let key = window_key(call.task.id.as_str(), &config, &call.input);
            if pools.debouncer(config.ms).acquire(&key).await {
                call.next(call.input.clone()).await
            } else {
                Ok(Value::Null)
            }
        })
        .build()
}

/// Throttle: leading-edge execution, at most once per window; excess
/// calls fail with a rate-limit error carrying the remaining wait.
pub(crate) fn throttle_definition() -> TaskMiddlewareDefinition {
    task_middleware(THROTTLE)
        .dependencies([DependencyRef::resource(TEMPORAL)])
        .run(|call, deps, config| async move {
            let config: TemporalConfig = parse_config(&config, THROTTLE)?;
            let pools = deps.resource::<TemporalPools>(TEMPORAL)?;
            let key = window_key(call.task.id.as_str(), &config, &call.input);
            match pools.throttler(config.ms).try_acquire(&key) {
                Ok(()) => call.next(call.input.clone()).await,
                Err(retry_after) => Err(RunnerError::MiddlewareRateLimitExceeded {
                    name: format!("throttle:{key}"),
                    retry_after: Some(retry_after),
                }),
            }
        })
        .build()
}
