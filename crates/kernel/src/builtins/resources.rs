//! Built-in resources: the shared pools behind the built-in middleware.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use runner_platform::ContextStorage;
use runner_resilience::{
    CircuitBreaker, CircuitBreakerConfig, Debouncer, Queue, Semaphore, Throttler, TokenBucket,
};
use serde_json::Value;

use crate::definitions::{resource, AnyValue, RegistrableItem};

/// Resource id of the named-semaphore pool.
pub const CONCURRENCY: &str = "runner.resources.concurrency";
/// Resource id of the named token-bucket pool.
pub const RATE_LIMIT: &str = "runner.resources.rate_limit";
/// Resource id of the named circuit-breaker pool.
pub const CIRCUIT_BREAKER: &str = "runner.resources.circuit_breaker";
/// Resource id of the temporal (debounce/throttle) pool.
pub const TEMPORAL: &str = "runner.resources.temporal";
/// Resource id of the per-task result-cache pool.
pub const CACHE: &str = "runner.resources.cache";
/// Resource id of the named-queue factory.
pub const QUEUES: &str = "runner.resources.queues";

/// Named semaphores, created on first use.
#[derive(Debug, Default)]
pub struct ConcurrencyPools {
    pools: DashMap<String, Arc<Semaphore>>,
}

impl ConcurrencyPools {
    /// The semaphore named `name`, created with `limit` on first access.
    ///
    /// The first caller's limit wins; later calls with a different limit
    /// get the existing semaphore.
    #[must_use]
    pub fn get_or_create(&self, name: &str, limit: usize) -> Arc<Semaphore> {
        self.pools
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone()
    }
}

/// Named token buckets, created on first use.
#[derive(Debug, Default)]
pub struct RateLimitBuckets {
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimitBuckets {
    /// The bucket named `name`, created on first access.
    #[must_use]
    pub fn get_or_create(&self, name: &str, capacity: u32, refill_per_sec: f64) -> Arc<TokenBucket> {
        self.buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(capacity, refill_per_sec)))
            .clone()
    }
}

/// Named circuit breakers, created on first use.
#[derive(Debug, Default)]
pub struct CircuitBreakers {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakers {
    /// The breaker named `name`, created with `config` on first access.
    #[must_use]
    pub fn get_or_create(&self, name: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, config)))
            .clone()
    }
}

/// Debouncers and throttlers keyed by window length.
#[derive(Debug, Default)]
pub struct TemporalPools {
    debouncers: DashMap<u64, Arc<Debouncer>>,
    throttlers: DashMap<u64, Arc<Throttler>>,
}

impl TemporalPools {
    /// The debouncer for a quiet window of `ms` milliseconds.
    #[must_use]
    pub fn debouncer(&self, ms: u64) -> Arc<Debouncer> {
        self.debouncers
            .entry(ms)
            .or_insert_with(|| Arc::new(Debouncer::new(Duration::from_millis(ms))))
            .clone()
    }

    /// The throttler for a window of `ms` milliseconds.
    #[must_use]
    pub fn throttler(&self, ms: u64) -> Arc<Throttler> {
        self.throttlers
            .entry(ms)
            .or_insert_with(|| Arc::new(Throttler::new(Duration::from_millis(ms))))
            .clone()
    }
}

/// Per-task result caches (moka), created on first use.
#[derive(Debug, Default)]
pub struct TaskCaches {
    caches: DashMap<String, moka::future::Cache<String, Value>>,
}

impl TaskCaches {
    /// The cache for `task_id`, created with the given bounds on first
    /// access.
    #[must_use]
    pub fn get_or_create(
        &self,
        task_id: &str,
        max_capacity: u64,
        ttl: Option<Duration>,
    ) -> moka::future::Cache<String, Value> {
        self.caches
            .entry(task_id.to_string())
            .or_insert_with(|| {
                let mut builder = moka::future::Cache::builder().max_capacity(max_capacity);
                if let Some(ttl) = ttl {
                    builder = builder.time_to_live(ttl);
                }
                builder.build()
            })
            .clone()
    }
}

/// Named single-flight queues sharing the platform's context storage for
/// deadlock detection.
pub struct QueueFactory {
    queues: DashMap<String, Arc<Queue>>,
    storage: ContextStorage,
}

impl std::fmt::Debug for QueueFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueFactory").field("queues", &self.queues.len()).finish()
    }
}

impl QueueFactory {
    fn new(storage: ContextStorage) -> Self {
        Self { queues: DashMap::new(), storage }
    }

    /// The queue named `name`, created on first access.
    #[must_use]
    pub fn get_or_create(&self, name: &str) -> Arc<Queue> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Queue::new(self.storage.clone())))
            .clone()
    }

    /// Drain and dispose every queue.
    pub async fn dispose_all(&self) {
        let queues: Vec<Arc<Queue>> = self.queues.iter().map(|q| q.value().clone()).collect();
        for queue in queues {
            queue.dispose(runner_resilience::DisposeOptions::default()).await;
        }
    }
}

/// The built-in resource definitions.
pub(crate) fn items() -> Vec<RegistrableItem> {
    vec![
        resource(CONCURRENCY)
            .init(|_config, _deps| async {
                Ok(Arc::new(ConcurrencyPools::default()) as AnyValue)
            })
            .build()
            .into(),
        resource(RATE_LIMIT)
            .init(|_config, _deps| async {
                Ok(Arc::new(RateLimitBuckets::default()) as AnyValue)
            })
            .build()
            .into(),
        resource(CIRCUIT_BREAKER)
            .init(|_config, _deps| async {
                Ok(Arc::new(CircuitBreakers::default()) as AnyValue)
            })
            .build()
            .into(),
        resource(TEMPORAL)
            .init(|_config, _deps| async { Ok(Arc::new(TemporalPools::default()) as AnyValue) })
            .build()
            .into(),
        resource(CACHE)
            .init(|_config, _deps| async { Ok(Arc::new(TaskCaches::default()) as AnyValue) })
            .build()
            .into(),
        resource(QUEUES)
            .init(|_config, deps| async move {
                let storage = deps.platform()?.context_storage();
                Ok(Arc::new(QueueFactory::new(storage)) as AnyValue)
            })
            .dispose(|value, _config, _deps| async move {
                if let Ok(factory) = value.downcast::<QueueFactory>() {
                    factory.dispose_all().await;
                }
                Ok(())
            })
            .build()
            .into(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_reuse_instances_by_name() {
        let pools = ConcurrencyPools::default();
        let a = pools.get_or_create("db", 2);
        let b = pools.get_or_create("db", 99);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.limit(), 2, "first caller's limit wins");
    }

    #[test]
    fn temporal_pools_key_by_window() {
        let pools = TemporalPools::default();
        let a = pools.debouncer(100);
        let b = pools.debouncer(100);
        let c = pools.debouncer(200);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
