//! Built-in concurrency-limit middleware, backed by named semaphores.

use serde::Deserialize;

use crate::builtins::resources::{ConcurrencyPools, CONCURRENCY};
use crate::builtins::parse_config;
use crate::definitions::{task_middleware, DependencyRef, TaskMiddlewareDefinition};

/// Middleware id.
pub const CONCURRENCY_MW: &str = "runner.middleware.concurrency";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConcurrencyConfig {
    /// Maximum concurrent executions sharing the named semaphore.
    limit: usize,
    /// Semaphore name; defaults to the task id.
    name: Option<String>,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { limit: 1, name: None }
    }
}

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(CONCURRENCY_MW)
        .dependencies([DependencyRef::resource(CONCURRENCY)])
        .run(|call, deps, config| async move {
            let config: ConcurrencyConfig = parse_config(&config, CONCURRENCY_MW)?;
            let pools = deps.resource::<ConcurrencyPools>(CONCURRENCY)?;
            let name = config.name.unwrap_or_else(|| call.task.id.to_string());
            let semaphore = pools.get_or_create(&name, config.limit.max(1));
            let _permit = semaphore.acquire().await?;
            call.next(call.input.clone()).await
        })
        .build()
}
