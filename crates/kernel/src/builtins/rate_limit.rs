//! Built-in rate-limit middleware: named token buckets, optionally keyed
//! by a JSON pointer into the input.

use runner_error::RunnerError;
use serde::Deserialize;

use crate::builtins::resources::{RateLimitBuckets, RATE_LIMIT};
use crate::builtins::parse_config;
use crate::definitions::{task_middleware, DependencyRef, TaskMiddlewareDefinition};

/// Middleware id.
pub const RATE_LIMIT_MW: &str = "runner.middleware.rate_limit";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RateLimitConfig {
    /// Bucket capacity (burst size).
    capacity: u32,
    /// Refill rate, tokens per second.
    refill_per_sec: f64,
    /// Bucket name; defaults to the task id.
    name: Option<String>,
    /// JSON pointer into the input; its value partitions the bucket
    /// (e.g. `/user_id` for per-user limits).
    key: Option<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { capacity: 10, refill_per_sec: 10.0, name: None, key: None }
    }
}

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(RATE_LIMIT_MW)
        .dependencies([DependencyRef::resource(RATE_LIMIT)])
        .run(|call, deps, config| async move {
            let config: RateLimitConfig = parse_config(&config, RATE_LIMIT_MW)?;
            let buckets = deps.resource::<RateLimitBuckets>(RATE_LIMIT)?;

            let base = config.name.unwrap_or_else(|| call.task.id.to_string());
            let name = match &config.key {
                Some(pointer) => {
                    let partition = call
                        .input
                        .pointer(pointer)
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "(none)".to_string());
                    format!("{base}:{partition}")
                }
                None => base,
            };

            let bucket = buckets.get_or_create(&name, config.capacity, config.refill_per_sec);
            match bucket.try_take() {
                Ok(()) => call.next(call.input.clone()).await,
                Err(retry_after) => Err(RunnerError::MiddlewareRateLimitExceeded {
                    name,
                    retry_after: Some(retry_after),
                }),
            }
        })
        .build()
}
