//! Built-in middleware, resources, events and tags, registered into every
//! store at construction.

mod cache;
mod circuit_breaker;
mod concurrency;
mod fallback;
mod rate_limit;
pub(crate) mod resources;
mod require_context;
mod retry;
mod temporal;
mod timeout;
mod tunnel;

use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

use crate::definitions::{tag, RegistrableItem};

pub use cache::CACHE_MW;
pub use circuit_breaker::CIRCUIT_BREAKER_MW;
pub use concurrency::CONCURRENCY_MW;
pub use fallback::fallback;
pub use rate_limit::RATE_LIMIT_MW;
pub use require_context::REQUIRE_CONTEXT;
pub use resources::{
    CircuitBreakers, ConcurrencyPools, QueueFactory, RateLimitBuckets, TaskCaches, TemporalPools,
    CACHE, CIRCUIT_BREAKER, CONCURRENCY, QUEUES, RATE_LIMIT, TEMPORAL,
};
pub use retry::RETRY;
pub use temporal::{DEBOUNCE, THROTTLE};
pub use timeout::TIMEOUT;
pub use tunnel::{TunnelService, TUNNEL, TUNNEL_TAG};

/// Tag for kernel-owned items.
pub const SYSTEM_TAG: &str = "runner.tags.system";
/// Tag marking items of interest to debug tooling.
pub const DEBUG_TAG: &str = "runner.tags.debug";

/// Everything a fresh store registers before user items arrive.
pub(crate) fn items() -> Vec<RegistrableItem> {
    let mut items: Vec<RegistrableItem> = crate::lifecycle::events();
    items.extend(resources::items());
    items.extend([
        tag(SYSTEM_TAG).build().into(),
        tag(DEBUG_TAG).build().into(),
        tag(TUNNEL_TAG).build().into(),
        retry::definition().into(),
        timeout::definition().into(),
        cache::definition().into(),
        concurrency::definition().into(),
        rate_limit::definition().into(),
        circuit_breaker::definition().into(),
        temporal::debounce_definition().into(),
        temporal::throttle_definition().into(),
        require_context::definition().into(),
        tunnel::definition().into(),
    ]);
    items
}

// ---------------------------------------------------------------------------
// Attachment helpers: `.middleware([builtins::retry(json!({...}))])`
// ---------------------------------------------------------------------------

use crate::definitions::{TagRef, TaskMiddlewareAttachment};

/// Attach the retry middleware with `config`.
#[must_use]
pub fn retry(config: Value) -> TaskMiddlewareAttachment {
    retry::definition().with(config)
}

/// Attach the timeout middleware with `config`.
#[must_use]
pub fn timeout(config: Value) -> TaskMiddlewareAttachment {
    timeout::definition().with(config)
}

/// Attach the cache middleware with `config`.
#[must_use]
pub fn cache(config: Value) -> TaskMiddlewareAttachment {
    cache::definition().with(config)
}

/// Attach the concurrency-limit middleware with `config`.
#[must_use]
pub fn concurrency(config: Value) -> TaskMiddlewareAttachment {
    concurrency::definition().with(config)
}

/// Attach the rate-limit middleware with `config`.
#[must_use]
pub fn rate_limit(config: Value) -> TaskMiddlewareAttachment {
    rate_limit::definition().with(config)
}

/// Attach the circuit-breaker middleware with `config`.
#[must_use]
pub fn circuit_breaker(config: Value) -> TaskMiddlewareAttachment {
    circuit_breaker::definition().with(config)
}

/// Attach the debounce middleware with `config`.
#[must_use]
pub fn debounce(config: Value) -> TaskMiddlewareAttachment {
    temporal::debounce_definition().with(config)
}

/// Attach the throttle middleware with `config`.
#[must_use]
pub fn throttle(config: Value) -> TaskMiddlewareAttachment {
    temporal::throttle_definition().with(config)
}

/// Attach the require-context middleware.
#[must_use]
pub fn require_context() -> TaskMiddlewareAttachment {
    require_context::definition().into()
}

/// The tag marking tunnel resources.
#[must_use]
pub fn tunnel_tag() -> TagRef {
    tag(TUNNEL_TAG).build().into()
}

/// Deserialize a middleware config, treating `null` as "all defaults".
pub(crate) fn parse_config<T>(config: &Value, middleware_id: &str) -> RunnerResult<T>
where
    T: serde::de::DeserializeOwned + Default,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| {
        RunnerError::validation("Middleware config", middleware_id, e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn builtin_ids_are_unique() {
        let items = items();
        let mut seen = HashSet::new();
        for item in &items {
            assert!(seen.insert(item.id().clone()), "duplicate builtin id: {}", item.id());
        }
    }

    #[test]
    fn builtins_live_under_the_runner_namespace() {
        for item in items() {
            assert!(
                item.id().as_str().starts_with("runner."),
                "builtin {} escapes the runner namespace",
                item.id()
            );
        }
    }
}
