//! The disposable façade returned by `run()`.

use std::sync::Arc;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use runner_error::{RunnerError, RunnerResult};
use runner_log::Logger;
use serde_json::Value;

use crate::definitions::{
    AnyValue, EventDefinition, ItemId, ResourceDefinition, TaskDefinition,
};
use crate::events::{EmitOptions, EmitReport, EventData, EventManager};
use crate::init;
use crate::runtime::RuntimeServices;
use crate::store::Store;
use crate::tasks::TaskRunner;

/// Anything that names an item: ids, strings, or the definitions
/// themselves.
pub trait IdRef {
    /// The referenced id.
    fn item_id(&self) -> ItemId;
}

impl IdRef for ItemId {
    fn item_id(&self) -> ItemId {
        self.clone()
    }
}

impl IdRef for &ItemId {
    fn item_id(&self) -> ItemId {
        (*self).clone()
    }
}

impl IdRef for &str {
    fn item_id(&self) -> ItemId {
        ItemId::new(self)
    }
}

impl IdRef for String {
    fn item_id(&self) -> ItemId {
        ItemId::new(self)
    }
}

impl IdRef for &TaskDefinition {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

impl IdRef for &ResourceDefinition {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

impl IdRef for &EventDefinition {
    fn item_id(&self) -> ItemId {
        self.id.clone()
    }
}

type DisposeFuture = Shared<BoxFuture<'static, Result<(), RunnerError>>>;

/// Handle to a booted runtime.
///
/// Cloning shares the runtime; disposal is idempotent across clones —
/// every caller of [`RunResult::dispose`] awaits the same underlying
/// teardown, and a second call after a failure does not re-enter
/// disposers.
#[derive(Clone)]
pub struct RunResult {
    services: Arc<RuntimeServices>,
    root_id: ItemId,
    initialized: Arc<Vec<ItemId>>,
    dispose_future: Arc<Mutex<Option<DisposeFuture>>>,
    dry_run: bool,
}

impl std::fmt::Debug for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunResult")
            .field("root", &self.root_id)
            .field("initialized", &self.initialized.len())
            .field("disposed", &self.services.is_disposed())
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl RunResult {
    pub(crate) fn new(
        services: Arc<RuntimeServices>,
        root_id: ItemId,
        initialized: Vec<ItemId>,
        dry_run: bool,
    ) -> Self {
        Self {
            services,
            root_id,
            initialized: Arc::new(initialized),
            dispose_future: Arc::new(Mutex::new(None)),
            dry_run,
        }
    }

    fn guard(&self) -> RunnerResult<()> {
        if self.services.is_disposed() {
            Err(RunnerError::disposed("Runtime"))
        } else {
            Ok(())
        }
    }

    /// The root resource's id.
    #[must_use]
    pub fn root_id(&self) -> &ItemId {
        &self.root_id
    }

    /// Whether this runtime booted in dry-run mode.
    #[must_use]
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub(crate) fn initialized_count(&self) -> usize {
        self.initialized.len()
    }

    /// The root resource's value, when it produced one.
    #[must_use]
    pub fn value(&self) -> Option<AnyValue> {
        self.services.store.resource(&self.root_id).ok().and_then(|r| r.value())
    }

    /// The root resource's value downcast to `T`.
    pub fn value_as<T: Send + Sync + 'static>(&self) -> RunnerResult<Arc<T>> {
        let value = self.value().ok_or_else(|| {
            RunnerError::validation("Resource value", self.root_id.as_str(), "no value available")
        })?;
        value.downcast::<T>().map_err(|_| {
            RunnerError::validation(
                "Resource value",
                self.root_id.as_str(),
                format!("value is not of the requested type `{}`", std::any::type_name::<T>()),
            )
        })
    }

    /// Run a task by id or definition.
    pub async fn run_task(&self, task: impl IdRef, input: Value) -> RunnerResult<Value> {
        self.guard()?;
        self.services.tasks.execute(&task.item_id(), input).await
    }

    /// Emit an event by id or definition.
    pub async fn emit_event(
        &self,
        event: impl IdRef,
        payload: Value,
        options: EmitOptions,
    ) -> RunnerResult<Option<EmitReport>> {
        self.guard()?;
        self.services
            .events
            .emit(&event.item_id(), EventData::Json(payload), ItemId::new("runner"), options)
            .await
    }

    /// A resource's value.
    pub fn get_resource_value(&self, resource: impl IdRef) -> RunnerResult<AnyValue> {
        self.guard()?;
        self.services.store.resource_value(&resource.item_id())
    }

    /// A resource's value downcast to `T`.
    pub fn resource<T: Send + Sync + 'static>(
        &self,
        resource: impl IdRef,
    ) -> RunnerResult<Arc<T>> {
        let id = resource.item_id();
        let value = self.get_resource_value(&id)?;
        value.downcast::<T>().map_err(|_| {
            RunnerError::validation(
                "Resource value",
                id.as_str(),
                format!("value is not of the requested type `{}`", std::any::type_name::<T>()),
            )
        })
    }

    /// A resource's merged config.
    pub fn get_resource_config(&self, resource: impl IdRef) -> RunnerResult<Value> {
        self.guard()?;
        Ok(self.services.store.resource(&resource.item_id())?.config())
    }

    /// Run `fut` with an application context bound; `require_context`
    /// middleware and `Dependencies::context` observe it.
    pub async fn with_context<T, F>(&self, value: Arc<T>, fut: F) -> RunnerResult<F::Output>
    where
        T: Send + Sync + 'static,
        F: std::future::Future,
    {
        self.services.app_context.scope(value, fut).await
    }

    /// The runtime logger.
    #[must_use]
    pub fn logger(&self) -> &Logger {
        &self.services.logger
    }

    /// The store, for integration tooling.
    #[must_use]
    pub fn store(&self) -> &Store {
        &self.services.store
    }

    /// The event manager, for integration tooling.
    #[must_use]
    pub fn event_manager(&self) -> &EventManager {
        &self.services.events
    }

    /// The task runner, for integration tooling.
    #[must_use]
    pub fn task_runner(&self) -> &TaskRunner {
        &self.services.tasks
    }

    /// Tear the runtime down.
    ///
    /// Resources dispose in reverse initialization order, then kernel
    /// services. Idempotent: concurrent and repeated callers share one
    /// teardown, and the runtime is marked disposed even if teardown
    /// fails.
    pub async fn dispose(&self) -> RunnerResult<()> {
        let shared = {
            let mut slot = self.dispose_future.lock();
            if let Some(existing) = slot.as_ref() {
                existing.clone()
            } else {
                let services = Arc::clone(&self.services);
                let initialized = Arc::clone(&self.initialized);
                let fut: BoxFuture<'static, Result<(), RunnerError>> = Box::pin(async move {
                    // Marked first: a failing teardown must not leave a
                    // half-alive runtime accepting work.
                    services.mark_disposed();
                    let bindings = services.drain_bindings();
                    for binding in bindings {
                        binding.dispose();
                    }
                    init::dispose_resources(&services, &initialized).await;
                    services.events.dispose();
                    services.logger.with_source("runner").info("runtime disposed");
                    Ok(())
                });
                let shared = fut.shared();
                *slot = Some(shared.clone());
                shared
            }
        };
        shared.await
    }
}
