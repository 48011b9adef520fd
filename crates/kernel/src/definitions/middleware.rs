//! Middleware definitions: onion-style interceptors for tasks and
//! resource initialization.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use runner_error::RunnerResult;
use serde_json::Value;

use crate::definitions::{AnyValue, DependencyRef, ItemId, ResourceDefinition, Schema, TaskDefinition, TaskFuture};
use crate::dependencies::Dependencies;

/// Where a middleware applies beyond explicit attachment.
#[derive(Clone)]
pub enum MiddlewareScope<T: ?Sized> {
    /// Only where attached.
    Attached,
    /// Every target.
    Everywhere,
    /// Targets satisfying the predicate.
    Where(Arc<dyn Fn(&T) -> bool + Send + Sync>),
}

impl<T: ?Sized> MiddlewareScope<T> {
    /// Whether the middleware should wrap `target` without being attached.
    #[must_use]
    pub fn applies_to(&self, target: &T) -> bool {
        match self {
            MiddlewareScope::Attached => false,
            MiddlewareScope::Everywhere => true,
            MiddlewareScope::Where(predicate) => predicate(target),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for MiddlewareScope<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MiddlewareScope::Attached => "attached",
            MiddlewareScope::Everywhere => "everywhere",
            MiddlewareScope::Where(_) => "where",
        };
        f.write_str(label)
    }
}

// ---------------------------------------------------------------------------
// Task middleware
// ---------------------------------------------------------------------------

type NextTaskFn = Arc<dyn Fn(Value) -> TaskFuture + Send + Sync>;

/// The call a task middleware intercepts.
pub struct TaskMiddlewareCall {
    /// The target task.
    pub task: Arc<TaskDefinition>,
    /// The input as it arrived at this layer.
    pub input: Value,
    next: NextTaskFn,
}

impl TaskMiddlewareCall {
    pub(crate) fn new(task: Arc<TaskDefinition>, input: Value, next: NextTaskFn) -> Self {
        Self { task, input, next }
    }

    /// Invoke the inner layer with `input`. Callable more than once
    /// (retry middleware re-runs the inner chain).
    #[must_use]
    pub fn next(&self, input: Value) -> TaskFuture {
        (self.next)(input)
    }
}

impl std::fmt::Debug for TaskMiddlewareCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMiddlewareCall").field("task", &self.task.id).finish()
    }
}

/// A task middleware body: `(call, deps, config) -> output`.
pub type TaskMiddlewareFn =
    Arc<dyn Fn(TaskMiddlewareCall, Dependencies, Value) -> TaskFuture + Send + Sync>;

/// A task middleware definition.
#[derive(Clone)]
pub struct TaskMiddlewareDefinition {
    /// Unique id.
    pub id: ItemId,
    pub(crate) run: TaskMiddlewareFn,
    /// Declared dependencies, resolved like a task's.
    pub dependencies: Vec<DependencyRef>,
    /// Global applicability beyond explicit attachments.
    pub scope: MiddlewareScope<TaskDefinition>,
    /// Validates per-attachment configs.
    pub config_schema: Option<Schema>,
    /// Free-form metadata.
    pub meta: Value,
}

impl std::fmt::Debug for TaskMiddlewareDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMiddlewareDefinition")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}

impl TaskMiddlewareDefinition {
    pub(crate) fn run_fn(&self) -> TaskMiddlewareFn {
        Arc::clone(&self.run)
    }

    /// Attach this middleware with a config value.
    #[must_use]
    pub fn with(&self, config: Value) -> TaskMiddlewareAttachment {
        TaskMiddlewareAttachment { definition: Arc::new(self.clone()), config }
    }
}

/// A task middleware attachment: definition plus per-attachment config.
#[derive(Clone)]
pub struct TaskMiddlewareAttachment {
    /// The middleware.
    pub definition: Arc<TaskMiddlewareDefinition>,
    /// Config passed to each invocation.
    pub config: Value,
}

impl std::fmt::Debug for TaskMiddlewareAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMiddlewareAttachment").field("id", &self.definition.id).finish()
    }
}

impl From<TaskMiddlewareDefinition> for TaskMiddlewareAttachment {
    fn from(definition: TaskMiddlewareDefinition) -> Self {
        Self { definition: Arc::new(definition), config: Value::Null }
    }
}

impl From<&TaskMiddlewareDefinition> for TaskMiddlewareAttachment {
    fn from(definition: &TaskMiddlewareDefinition) -> Self {
        Self { definition: Arc::new(definition.clone()), config: Value::Null }
    }
}

/// Definer for a task middleware.
#[must_use]
pub fn task_middleware(id: impl Into<ItemId>) -> TaskMiddlewareBuilder {
    TaskMiddlewareBuilder {
        id: id.into(),
        run: None,
        dependencies: Vec::new(),
        scope: MiddlewareScope::Attached,
        config_schema: None,
        meta: Value::Null,
    }
}

/// Fluent builder produced by [`task_middleware`].
pub struct TaskMiddlewareBuilder {
    id: ItemId,
    run: Option<TaskMiddlewareFn>,
    dependencies: Vec<DependencyRef>,
    scope: MiddlewareScope<TaskDefinition>,
    config_schema: Option<Schema>,
    meta: Value,
}

impl TaskMiddlewareBuilder {
    /// Set the interceptor body.
    #[must_use]
    pub fn run<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(TaskMiddlewareCall, Dependencies, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<Value>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |call, deps, config| Box::pin(body(call, deps, config))));
        self
    }

    /// Declare dependencies.
    #[must_use]
    pub fn dependencies(mut self, deps: impl IntoIterator<Item = DependencyRef>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Apply to every task, even without attachment.
    #[must_use]
    pub fn everywhere(mut self) -> Self {
        self.scope = MiddlewareScope::Everywhere;
        self
    }

    /// Apply to tasks satisfying `predicate`, even without attachment.
    #[must_use]
    pub fn everywhere_when(
        mut self,
        predicate: impl Fn(&TaskDefinition) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.scope = MiddlewareScope::Where(Arc::new(predicate));
        self
    }

    /// Validate attachment configs against `schema`.
    #[must_use]
    pub fn config_schema(mut self, schema: Schema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Freeze the definition. A middleware without a body passes calls
    /// straight through.
    #[must_use]
    pub fn build(self) -> TaskMiddlewareDefinition {
        let run = self.run.unwrap_or_else(|| {
            Arc::new(|call: TaskMiddlewareCall, _deps, _config| {
                let input = call.input.clone();
                call.next(input)
            })
        });
        TaskMiddlewareDefinition {
            id: self.id,
            run,
            dependencies: self.dependencies,
            scope: self.scope,
            config_schema: self.config_schema,
            meta: self.meta,
        }
    }
}

// ---------------------------------------------------------------------------
// Resource middleware
// ---------------------------------------------------------------------------

/// Boxed future returned by resource init chains.
pub type ResourceInitFuture = BoxFuture<'static, RunnerResult<AnyValue>>;

type NextResourceFn = Arc<dyn Fn(Value) -> ResourceInitFuture + Send + Sync>;

/// The initialization a resource middleware intercepts.
pub struct ResourceMiddlewareCall {
    /// The target resource.
    pub resource: Arc<ResourceDefinition>,
    /// The (merged) config as it arrived at this layer.
    pub config: Value,
    next: NextResourceFn,
}

impl ResourceMiddlewareCall {
    pub(crate) fn new(resource: Arc<ResourceDefinition>, config: Value, next: NextResourceFn) -> Self {
        Self { resource, config, next }
    }

    /// Invoke the inner layer with `config`.
    #[must_use]
    pub fn next(&self, config: Value) -> ResourceInitFuture {
        (self.next)(config)
    }
}

impl std::fmt::Debug for ResourceMiddlewareCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMiddlewareCall").field("resource", &self.resource.id).finish()
    }
}

/// A resource middleware body: `(call, deps, config) -> value`.
pub type ResourceMiddlewareFn =
    Arc<dyn Fn(ResourceMiddlewareCall, Dependencies, Value) -> ResourceInitFuture + Send + Sync>;

/// A resource middleware definition.
#[derive(Clone)]
pub struct ResourceMiddlewareDefinition {
    /// Unique id.
    pub id: ItemId,
    pub(crate) run: ResourceMiddlewareFn,
    /// Declared dependencies. A resource middleware must not depend on the
    /// resource it wraps; the resolver rejects such graphs.
    pub dependencies: Vec<DependencyRef>,
    /// Global applicability beyond explicit attachments.
    pub scope: MiddlewareScope<ResourceDefinition>,
    /// Validates per-attachment configs.
    pub config_schema: Option<Schema>,
    /// Free-form metadata.
    pub meta: Value,
}

impl std::fmt::Debug for ResourceMiddlewareDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMiddlewareDefinition")
            .field("id", &self.id)
            .field("scope", &self.scope)
            .finish()
    }
}

impl ResourceMiddlewareDefinition {
    pub(crate) fn run_fn(&self) -> ResourceMiddlewareFn {
        Arc::clone(&self.run)
    }

    /// Attach this middleware with a config value.
    #[must_use]
    pub fn with(&self, config: Value) -> ResourceMiddlewareAttachment {
        ResourceMiddlewareAttachment { definition: Arc::new(self.clone()), config }
    }
}

/// A resource middleware attachment.
#[derive(Clone)]
pub struct ResourceMiddlewareAttachment {
    /// The middleware.
    pub definition: Arc<ResourceMiddlewareDefinition>,
    /// Config passed to each invocation.
    pub config: Value,
}

impl std::fmt::Debug for ResourceMiddlewareAttachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMiddlewareAttachment").field("id", &self.definition.id).finish()
    }
}

impl From<ResourceMiddlewareDefinition> for ResourceMiddlewareAttachment {
    fn from(definition: ResourceMiddlewareDefinition) -> Self {
        Self { definition: Arc::new(definition), config: Value::Null }
    }
}

impl From<&ResourceMiddlewareDefinition> for ResourceMiddlewareAttachment {
    fn from(definition: &ResourceMiddlewareDefinition) -> Self {
        Self { definition: Arc::new(definition.clone()), config: Value::Null }
    }
}

/// Definer for a resource middleware.
#[must_use]
pub fn resource_middleware(id: impl Into<ItemId>) -> ResourceMiddlewareBuilder {
    ResourceMiddlewareBuilder {
        id: id.into(),
        run: None,
        dependencies: Vec::new(),
        scope: MiddlewareScope::Attached,
        config_schema: None,
        meta: Value::Null,
    }
}

/// Fluent builder produced by [`resource_middleware`].
pub struct ResourceMiddlewareBuilder {
    id: ItemId,
    run: Option<ResourceMiddlewareFn>,
    dependencies: Vec<DependencyRef>,
    scope: MiddlewareScope<ResourceDefinition>,
    config_schema: Option<Schema>,
    meta: Value,
}

impl ResourceMiddlewareBuilder {
    /// Set the interceptor body.
    #[must_use]
    pub fn run<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(ResourceMiddlewareCall, Dependencies, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<AnyValue>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |call, deps, config| Box::pin(body(call, deps, config))));
        self
    }

    /// Declare dependencies.
    #[must_use]
    pub fn dependencies(mut self, deps: impl IntoIterator<Item = DependencyRef>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Apply to every resource, even without attachment.
    #[must_use]
    pub fn everywhere(mut self) -> Self {
        self.scope = MiddlewareScope::Everywhere;
        self
    }

    /// Apply to resources satisfying `predicate`.
    #[must_use]
    pub fn everywhere_when(
        mut self,
        predicate: impl Fn(&ResourceDefinition) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.scope = MiddlewareScope::Where(Arc::new(predicate));
        self
    }

    /// Validate attachment configs against `schema`.
    #[must_use]
    pub fn config_schema(mut self, schema: Schema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Freeze the definition. A middleware without a body passes the
    /// config straight through.
    #[must_use]
    pub fn build(self) -> ResourceMiddlewareDefinition {
        let run = self.run.unwrap_or_else(|| {
            Arc::new(|call: ResourceMiddlewareCall, _deps, _config| {
                let config = call.config.clone();
                call.next(config)
            })
        });
        ResourceMiddlewareDefinition {
            id: self.id,
            run,
            dependencies: self.dependencies,
            scope: self.scope,
            config_schema: self.config_schema,
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::task;

    #[test]
    fn scope_predicates_gate_application() {
        let target = task("app.tagged").build();
        let other = task("app.other").build();

        let scope: MiddlewareScope<TaskDefinition> =
            MiddlewareScope::Where(Arc::new(|t: &TaskDefinition| t.id.as_str() == "app.tagged"));
        assert!(scope.applies_to(&target));
        assert!(!scope.applies_to(&other));
        assert!(MiddlewareScope::<TaskDefinition>::Everywhere.applies_to(&other));
        assert!(!MiddlewareScope::<TaskDefinition>::Attached.applies_to(&target));
    }

    #[test]
    fn attachment_defaults_to_null_config() {
        let mw = task_middleware("app.mw.log").build();
        let attachment: TaskMiddlewareAttachment = (&mw).into();
        assert!(attachment.config.is_null());
        let configured = mw.with(serde_json::json!({"level": "debug"}));
        assert_eq!(configured.config["level"], "debug");
    }
}
