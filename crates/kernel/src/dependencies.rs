//! The resolved-dependency handle passed to every body.
//!
//! A `Dependencies` value is scoped to one consumer (task, resource, hook
//! or middleware): it resolves only ids the consumer declared, which keeps
//! the dependency graph honest — nothing can reach into the store behind
//! the resolver's back.

use std::sync::{Arc, Weak};

use runner_error::{RunnerError, RunnerResult};
use runner_log::Logger;
use serde_json::Value;

use crate::definitions::{AnyValue, DependencyRef, ItemId, ItemKind};
use crate::events::{EmitOptions, EventData};
use crate::runtime::RuntimeServices;

/// Read-only handle resolving a consumer's declared dependencies.
#[derive(Clone)]
pub struct Dependencies {
    inner: Arc<DependenciesInner>,
}

struct DependenciesInner {
    owner: ItemId,
    declared: Vec<DependencyRef>,
    services: Weak<RuntimeServices>,
}

impl std::fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dependencies")
            .field("owner", &self.inner.owner)
            .field("declared", &self.inner.declared.len())
            .finish()
    }
}

impl Dependencies {
    pub(crate) fn new(
        owner: ItemId,
        declared: Vec<DependencyRef>,
        services: Weak<RuntimeServices>,
    ) -> Self {
        Self { inner: Arc::new(DependenciesInner { owner, declared, services }) }
    }

    /// A handle that resolves nothing. Used for consumers with no declared
    /// dependencies and in tests.
    #[must_use]
    pub(crate) fn empty(owner: ItemId, services: Weak<RuntimeServices>) -> Self {
        Self::new(owner, Vec::new(), services)
    }

    /// The consumer this handle belongs to.
    #[must_use]
    pub fn owner(&self) -> &ItemId {
        &self.inner.owner
    }

    fn services(&self) -> RunnerResult<Arc<RuntimeServices>> {
        self.inner.services.upgrade().ok_or_else(|| RunnerError::disposed("Runtime"))
    }

    fn assert_declared(&self, id: &ItemId, kind: ItemKind) -> RunnerResult<()> {
        let declared = self
            .inner
            .declared
            .iter()
            .any(|dep| dep.id() == id && dep.kind() == kind);
        if declared {
            Ok(())
        } else {
            Err(RunnerError::dependency_not_found(kind, id))
        }
    }

    /// Run a declared task through the task runner (middleware included).
    pub async fn run_task(&self, id: impl Into<ItemId>, input: Value) -> RunnerResult<Value> {
        let id = id.into();
        self.assert_declared(&id, ItemKind::Task)?;
        let services = self.services()?;
        services.tasks.execute(&id, input).await
    }

    /// The raw value of a declared resource.
    pub fn resource_value(&self, id: impl Into<ItemId>) -> RunnerResult<AnyValue> {
        let id = id.into();
        self.assert_declared(&id, ItemKind::Resource)?;
        let services = self.services()?;
        services.store.resource_value(&id)
    }

    /// The value of a declared resource, downcast to `T`.
    pub fn resource<T: Send + Sync + 'static>(
        &self,
        id: impl Into<ItemId>,
    ) -> RunnerResult<Arc<T>> {
        let id = id.into();
        let value = self.resource_value(id.clone())?;
        value.downcast::<T>().map_err(|_| {
            RunnerError::validation(
                "Resource value",
                id.as_str(),
                format!("value is not of the requested type `{}`", std::any::type_name::<T>()),
            )
        })
    }

    /// Emit a declared event with a JSON payload.
    pub async fn emit(&self, id: impl Into<ItemId>, payload: Value) -> RunnerResult<()> {
        let id = id.into();
        self.assert_declared(&id, ItemKind::Event)?;
        let services = self.services()?;
        services
            .events
            .emit(&id, EventData::Json(payload), self.inner.owner.clone(), EmitOptions::default())
            .await?;
        Ok(())
    }

    /// The runtime logger, scoped to this consumer.
    pub fn logger(&self) -> RunnerResult<Logger> {
        Ok(self.services()?.logger.with_source(self.inner.owner.to_string()))
    }

    /// Read the ambient application context slot, if one is bound.
    pub fn context_raw(&self) -> RunnerResult<Option<AnyValue>> {
        self.services()?.app_context.get_raw()
    }

    /// Read the ambient application context downcast to `T`.
    pub fn context<T: Send + Sync + 'static>(&self) -> RunnerResult<Option<Arc<T>>> {
        self.services()?.app_context.get::<T>()
    }

    /// The platform the runtime booted on.
    pub fn platform(&self) -> RunnerResult<Arc<dyn runner_platform::Platform>> {
        Ok(Arc::clone(&self.services()?.platform))
    }

    /// Kernel-internal access for built-in middleware.
    pub(crate) fn kernel_services(&self) -> RunnerResult<Arc<RuntimeServices>> {
        self.services()
    }
}
