//! Built-in timeout middleware.

use std::time::Duration;

use serde::Deserialize;

use crate::builtins::parse_config;
use crate::definitions::{task_middleware, TaskMiddlewareDefinition};

/// Middleware id.
pub const TIMEOUT: &str = "runner.middleware.timeout";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TimeoutConfig {
    /// Deadline for the wrapped chain.
    ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { ms: 30_000 }
    }
}

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(TIMEOUT)
        .run(|call, _deps, config| async move {
            let config: TimeoutConfig = parse_config(&config, TIMEOUT)?;
            let fut = call.next(call.input.clone());
            runner_resilience::timeout(Duration::from_millis(config.ms), fut).await
        })
        .build()
}
