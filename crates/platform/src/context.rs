//! Task-local context storage — the async-local-storage analogue.
//!
//! Values are keyed by storage instance and propagated through a
//! `tokio::task_local!` map: entering a scope clones the current map,
//! binds the slot, and runs the future under the new map, so nested scopes
//! shadow without mutating their parents and sibling tasks never observe
//! each other's slots.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use runner_error::{RunnerError, RunnerResult};

type Slot = Arc<dyn Any + Send + Sync>;

tokio::task_local! {
    static SLOTS: HashMap<u64, Slot>;
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// One task-local slot.
///
/// A live storage reads and scopes values; the unsupported stub fails both
/// accessors with `PlatformUnsupported` — never at construction time.
#[derive(Debug, Clone)]
pub struct ContextStorage {
    key: u64,
    supported: bool,
}

impl ContextStorage {
    /// A live slot with a process-unique key.
    #[must_use]
    pub fn new() -> Self {
        Self { key: NEXT_KEY.fetch_add(1, Ordering::Relaxed), supported: true }
    }

    /// The stub handed out by hosts without task-local support (or when
    /// `RUNNER_FORCE_NOOP_ALS` forces it).
    #[must_use]
    pub fn unsupported() -> Self {
        Self { key: 0, supported: false }
    }

    /// Whether the accessors work on this storage.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        self.supported
    }

    /// Read the slot bound for the current task scope, untyped.
    pub fn get_raw(&self) -> RunnerResult<Option<Slot>> {
        if !self.supported {
            return Err(RunnerError::platform_unsupported("ContextStorage::get"));
        }
        Ok(SLOTS.try_with(|slots| slots.get(&self.key).cloned()).ok().flatten())
    }

    /// Read the slot bound for the current task scope, downcast to `T`.
    ///
    /// A slot bound to a different type reads as `None`.
    pub fn get<T: Send + Sync + 'static>(&self) -> RunnerResult<Option<Arc<T>>> {
        Ok(self.get_raw()?.and_then(|slot| slot.downcast::<T>().ok()))
    }

    /// Run `fut` with the slot bound to `value`.
    pub async fn scope<T, F>(&self, value: Arc<T>, fut: F) -> RunnerResult<F::Output>
    where
        T: Send + Sync + 'static,
        F: Future,
    {
        self.scope_raw(value as Slot, fut).await
    }

    /// Run `fut` with the slot bound to an untyped value.
    pub async fn scope_raw<F>(&self, value: Slot, fut: F) -> RunnerResult<F::Output>
    where
        F: Future,
    {
        if !self.supported {
            return Err(RunnerError::platform_unsupported("ContextStorage::scope"));
        }
        let mut slots = SLOTS.try_with(Clone::clone).unwrap_or_default();
        slots.insert(self.key, value);
        Ok(SLOTS.scope(slots, fut).await)
    }
}

impl Default for ContextStorage {
    fn default() -> Self {
        Self::new()
    }
}
