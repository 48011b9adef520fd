//! Built-in result-cache middleware over the per-task cache pool.

use std::time::Duration;

use serde::Deserialize;

use crate::builtins::resources::{TaskCaches, CACHE};
use crate::builtins::parse_config;
use crate::definitions::{task_middleware, DependencyRef, TaskMiddlewareDefinition};

/// Middleware id.
pub const CACHE_MW: &str = "runner.middleware.cache";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheConfig {
    /// Maximum entries per task.
    max_capacity: u64,
    /// Entry lifetime; absent means no expiry.
    ttl_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_capacity: 1024, ttl_ms: None }
    }
}

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(CACHE_MW)
        .dependencies([DependencyRef::resource(CACHE)])
        .run(|call, deps, config| async move {
            let config: CacheConfig = parse_config(&config, CACHE_MW)?;
            let caches = deps.resource::<TaskCaches>(CACHE)?;
            let cache = caches.get_or_create(
                call.task.id.as_str(),
                config.max_capacity,
                config.ttl_ms.map(Duration::from_millis),
            );

            // The serialized input is the cache key; inputs that fail to
            // serialize bypass the cache rather than fail the task.
            let Ok(key) = serde_json::to_string(&call.input) else {
                return call.next(call.input.clone()).await;
            };

            if let Some(hit) = cache.get(&key).await {
                return Ok(hit);
            }
            let output = call.next(call.input.clone()).await?;
            cache.insert(key, output.clone()).await;
            Ok(output)
        })
        .build()
}
