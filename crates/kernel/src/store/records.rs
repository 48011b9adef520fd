//! Mutable shadows of the frozen definitions.

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::Value;

use crate::definitions::{
    AnyValue, HookDefinition, ResourceDefinition, ResourceMiddlewareDefinition, TaskDefinition,
    TaskFuture, TaskMiddlewareDefinition,
};
use crate::dependencies::Dependencies;

/// A task's composed middleware chain, cached at lock time.
pub type ComposedTaskFn = Arc<dyn Fn(Value) -> TaskFuture + Send + Sync>;

/// Runtime state of a task.
pub struct TaskRecord {
    /// The frozen definition.
    pub definition: Arc<TaskDefinition>,
    pub(crate) deps: OnceLock<Dependencies>,
    pub(crate) composed: OnceLock<ComposedTaskFn>,
}

impl TaskRecord {
    pub(crate) fn new(definition: Arc<TaskDefinition>) -> Self {
        Self { definition, deps: OnceLock::new(), composed: OnceLock::new() }
    }

    /// Resolved dependencies, available from lock time on.
    pub(crate) fn dependencies(&self) -> Option<Dependencies> {
        self.deps.get().cloned()
    }

    /// The composed runner, available from lock time on.
    pub(crate) fn composed(&self) -> Option<ComposedTaskFn> {
        self.composed.get().cloned()
    }
}

impl std::fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.definition.id)
            .field("composed", &self.composed.get().is_some())
            .finish()
    }
}

/// Lifecycle of a resource record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// In the store, not yet initialized.
    Registered,
    /// `init` is running.
    Initializing,
    /// `init` resolved (or its failure was suppressed).
    Initialized,
    /// `dispose` is running.
    Disposing,
    /// `dispose` finished.
    Disposed,
}

/// Runtime state of a resource.
pub struct ResourceRecord {
    /// The frozen definition.
    pub definition: Arc<ResourceDefinition>,
    pub(crate) config: RwLock<Option<Value>>,
    pub(crate) deps: OnceLock<Dependencies>,
    /// `Some(None)` means init was suppressed: initialized, no value.
    pub(crate) value: OnceLock<Option<AnyValue>>,
    pub(crate) state: RwLock<ResourceState>,
    pub(crate) dispose_done: AtomicBool,
}

impl ResourceRecord {
    pub(crate) fn new(definition: Arc<ResourceDefinition>, config: Option<Value>) -> Self {
        Self {
            definition,
            config: RwLock::new(config),
            deps: OnceLock::new(),
            value: OnceLock::new(),
            state: RwLock::new(ResourceState::Registered),
            dispose_done: AtomicBool::new(false),
        }
    }

    /// The bound config, JSON `null` when the resource was registered raw.
    #[must_use]
    pub fn config(&self) -> Value {
        self.config.read().clone().unwrap_or(Value::Null)
    }

    /// The initialized value, if the resource produced one.
    #[must_use]
    pub fn value(&self) -> Option<AnyValue> {
        self.value.get().cloned().flatten()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ResourceState {
        *self.state.read()
    }

    /// Whether init completed (including suppressed failures).
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        matches!(
            self.state(),
            ResourceState::Initialized | ResourceState::Disposing | ResourceState::Disposed
        )
    }

    pub(crate) fn set_state(&self, state: ResourceState) {
        *self.state.write() = state;
    }

    pub(crate) fn dependencies(&self) -> Option<Dependencies> {
        self.deps.get().cloned()
    }

    /// Flip the dispose latch; true exactly once.
    pub(crate) fn begin_dispose(&self) -> bool {
        !self.dispose_done.swap(true, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ResourceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRecord")
            .field("id", &self.definition.id)
            .field("state", &self.state())
            .field("configured", &self.config.read().is_some())
            .finish()
    }
}

/// Runtime state of a hook.
pub struct HookRecord {
    /// The frozen definition.
    pub definition: Arc<HookDefinition>,
    pub(crate) deps: OnceLock<Dependencies>,
}

impl HookRecord {
    pub(crate) fn new(definition: Arc<HookDefinition>) -> Self {
        Self { definition, deps: OnceLock::new() }
    }

    pub(crate) fn dependencies(&self) -> Option<Dependencies> {
        self.deps.get().cloned()
    }
}

impl std::fmt::Debug for HookRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRecord").field("id", &self.definition.id).finish()
    }
}

/// Runtime state of a task middleware.
pub struct TaskMiddlewareRecord {
    /// The frozen definition.
    pub definition: Arc<TaskMiddlewareDefinition>,
    pub(crate) deps: OnceLock<Dependencies>,
}

impl TaskMiddlewareRecord {
    pub(crate) fn new(definition: Arc<TaskMiddlewareDefinition>) -> Self {
        Self { definition, deps: OnceLock::new() }
    }

    pub(crate) fn dependencies(&self) -> Option<Dependencies> {
        self.deps.get().cloned()
    }
}

impl std::fmt::Debug for TaskMiddlewareRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMiddlewareRecord").field("id", &self.definition.id).finish()
    }
}

/// Runtime state of a resource middleware.
pub struct ResourceMiddlewareRecord {
    /// The frozen definition.
    pub definition: Arc<ResourceMiddlewareDefinition>,
    pub(crate) deps: OnceLock<Dependencies>,
}

impl ResourceMiddlewareRecord {
    pub(crate) fn new(definition: Arc<ResourceMiddlewareDefinition>) -> Self {
        Self { definition, deps: OnceLock::new() }
    }

    pub(crate) fn dependencies(&self) -> Option<Dependencies> {
        self.deps.get().cloned()
    }
}

impl std::fmt::Debug for ResourceMiddlewareRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMiddlewareRecord").field("id", &self.definition.id).finish()
    }
}
