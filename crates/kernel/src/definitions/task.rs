//! Task definitions: awaitable units of work with declared dependencies.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use runner_error::RunnerResult;
use serde_json::Value;

use crate::definitions::{DependencyRef, ItemId, Schema, TagRef, TaskMiddlewareAttachment};
use crate::dependencies::Dependencies;

/// Boxed future returned by task bodies and middleware.
pub type TaskFuture = BoxFuture<'static, RunnerResult<Value>>;

/// A task body.
pub type TaskFn = Arc<dyn Fn(Value, Dependencies) -> TaskFuture + Send + Sync>;

/// A task: an idempotent, awaitable unit of work.
///
/// A task without a body is *phantom*: it must be claimed by a tunnel
/// before it can run.
#[derive(Clone)]
pub struct TaskDefinition {
    /// Unique id.
    pub id: ItemId,
    /// The body; `None` for phantom tasks.
    pub(crate) run: Option<TaskFn>,
    /// Declared dependencies, resolved before the task becomes runnable.
    pub dependencies: Vec<DependencyRef>,
    /// Middleware attached directly to this task, outermost first.
    pub middleware: Vec<TaskMiddlewareAttachment>,
    /// Tags; tags with schemas add I/O contracts.
    pub tags: Vec<TagRef>,
    /// Validates the input before anything runs.
    pub input_schema: Option<Schema>,
    /// Validates the final output.
    pub result_schema: Option<Schema>,
    /// Free-form metadata.
    pub meta: Value,
}

impl std::fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("id", &self.id)
            .field("phantom", &self.is_phantom())
            .field("dependencies", &self.dependencies.len())
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

impl TaskDefinition {
    /// Whether this task has no local body.
    #[must_use]
    pub fn is_phantom(&self) -> bool {
        self.run.is_none()
    }

    /// The body, when present.
    #[must_use]
    pub(crate) fn run_fn(&self) -> Option<TaskFn> {
        self.run.clone()
    }

    /// Whether `tag_id` is attached.
    #[must_use]
    pub fn has_tag(&self, tag_id: &ItemId) -> bool {
        self.tags.iter().any(|t| t.id() == tag_id)
    }
}

/// Definer for a task.
#[must_use]
pub fn task(id: impl Into<ItemId>) -> TaskBuilder {
    TaskBuilder {
        id: id.into(),
        run: None,
        dependencies: Vec::new(),
        middleware: Vec::new(),
        tags: Vec::new(),
        input_schema: None,
        result_schema: None,
        meta: Value::Null,
    }
}

/// Definer for a phantom task: no body, routed by a tunnel.
#[must_use]
pub fn phantom_task(id: impl Into<ItemId>) -> TaskDefinition {
    task(id).build()
}

/// Fluent builder produced by [`task`].
pub struct TaskBuilder {
    id: ItemId,
    run: Option<TaskFn>,
    dependencies: Vec<DependencyRef>,
    middleware: Vec<TaskMiddlewareAttachment>,
    tags: Vec<TagRef>,
    input_schema: Option<Schema>,
    result_schema: Option<Schema>,
    meta: Value,
}

impl TaskBuilder {
    /// Set the body.
    #[must_use]
    pub fn run<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Value, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<Value>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |input, deps| Box::pin(body(input, deps))));
        self
    }

    /// Declare dependencies.
    #[must_use]
    pub fn dependencies(mut self, deps: impl IntoIterator<Item = DependencyRef>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Attach middleware, outermost first.
    #[must_use]
    pub fn middleware(
        mut self,
        middleware: impl IntoIterator<Item = TaskMiddlewareAttachment>,
    ) -> Self {
        self.middleware.extend(middleware);
        self
    }

    /// Attach tags.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = TagRef>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Validate inputs against `schema`.
    #[must_use]
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Validate the output against `schema`.
    #[must_use]
    pub fn result_schema(mut self, schema: Schema) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Freeze the definition. Without a body the task is phantom.
    #[must_use]
    pub fn build(self) -> TaskDefinition {
        TaskDefinition {
            id: self.id,
            run: self.run,
            dependencies: self.dependencies,
            middleware: self.middleware,
            tags: self.tags,
            input_schema: self.input_schema,
            result_schema: self.result_schema,
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn built_task_carries_its_shape() {
        let t = task("app.hello")
            .run(|_input, _deps| async move { Ok(json!("hi")) })
            .dependencies([DependencyRef::resource("app.db")])
            .build();
        assert_eq!(t.id.as_str(), "app.hello");
        assert!(!t.is_phantom());
        assert_eq!(t.dependencies.len(), 1);
    }

    #[test]
    fn bodyless_task_is_phantom() {
        assert!(phantom_task("remote.compute").is_phantom());
        assert!(task("also.remote").build().is_phantom());
    }
}
