//! Resource definitions: managed singletons with init/dispose.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use runner_error::RunnerResult;
use serde_json::Value;

use crate::definitions::{
    AnyValue, DependencyRef, ItemId, RegistrableItem, ResourceMiddlewareAttachment, Schema, TagRef,
};
use crate::dependencies::Dependencies;

/// A resource body: `(config, deps) -> value`.
pub type ResourceInitFn =
    Arc<dyn Fn(Value, Dependencies) -> BoxFuture<'static, RunnerResult<AnyValue>> + Send + Sync>;

/// A resource disposer: `(value, config, deps)`.
pub type ResourceDisposeFn = Arc<
    dyn Fn(AnyValue, Value, Dependencies) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync,
>;

/// Merges the configs of repeated `.with()` registrations.
pub type ConfigMergerFn = Arc<dyn Fn(Value, Value) -> RunnerResult<Value> + Send + Sync>;

type RegisterFn = Arc<dyn Fn(&Value) -> Vec<RegistrableItem> + Send + Sync>;

/// A resource: a managed singleton whose value is produced once by `init`
/// and released by `dispose`, and which may register child items.
#[derive(Clone)]
pub struct ResourceDefinition {
    /// Unique id.
    pub id: ItemId,
    /// Produces the value; `None` makes the resource a pure container
    /// (its value resolves to JSON `null`).
    pub(crate) init: Option<ResourceInitFn>,
    /// Releases the value during teardown.
    pub(crate) dispose: Option<ResourceDisposeFn>,
    /// Items registered when this resource enters the store.
    pub(crate) register: Vec<RegistrableItem>,
    /// Config-dependent registrations, evaluated during the walk.
    pub(crate) register_fn: Option<RegisterFn>,
    /// Declared dependencies.
    pub dependencies: Vec<DependencyRef>,
    /// Middleware wrapped around `init`, outermost first.
    pub middleware: Vec<ResourceMiddlewareAttachment>,
    /// Tags.
    pub tags: Vec<TagRef>,
    /// Validates the merged config before init.
    pub config_schema: Option<Schema>,
    /// Validates JSON values produced by init.
    pub result_schema: Option<Schema>,
    /// Merges repeated `.with()` configs; absent, a second `.with()`
    /// registration is rejected.
    pub(crate) config_merger: Option<ConfigMergerFn>,
    /// Registrations this resource replaces, applied once the whole tree
    /// is known.
    pub(crate) overrides: Vec<RegistrableItem>,
    /// Free-form metadata.
    pub meta: Value,
}

impl std::fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("id", &self.id)
            .field("has_init", &self.init.is_some())
            .field("has_dispose", &self.dispose.is_some())
            .field("registers", &self.register.len())
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

impl ResourceDefinition {
    /// Pair this resource with a config, producing a configured instance
    /// that shares the base id.
    #[must_use]
    pub fn with(&self, config: Value) -> ConfiguredResource {
        ConfiguredResource { definition: Arc::new(self.clone()), config }
    }

    pub(crate) fn init_fn(&self) -> Option<ResourceInitFn> {
        self.init.clone()
    }

    pub(crate) fn dispose_fn(&self) -> Option<ResourceDisposeFn> {
        self.dispose.clone()
    }

    pub(crate) fn merger(&self) -> Option<ConfigMergerFn> {
        self.config_merger.clone()
    }

    /// All items this resource registers for `config`.
    #[must_use]
    pub(crate) fn registrations(&self, config: &Value) -> Vec<RegistrableItem> {
        let mut items = self.register.clone();
        if let Some(register_fn) = &self.register_fn {
            items.extend(register_fn(config));
        }
        items
    }

    /// Whether `tag_id` is attached.
    #[must_use]
    pub fn has_tag(&self, tag_id: &ItemId) -> bool {
        self.tags.iter().any(|t| t.id() == tag_id)
    }
}

/// A resource paired with a config via [`ResourceDefinition::with`].
#[derive(Clone)]
pub struct ConfiguredResource {
    /// The underlying resource.
    pub definition: Arc<ResourceDefinition>,
    /// The bound config.
    pub config: Value,
}

impl std::fmt::Debug for ConfiguredResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredResource").field("id", &self.definition.id).finish()
    }
}

/// Definer for a resource.
#[must_use]
pub fn resource(id: impl Into<ItemId>) -> ResourceBuilder {
    ResourceBuilder {
        id: id.into(),
        init: None,
        dispose: None,
        register: Vec::new(),
        register_fn: None,
        dependencies: Vec::new(),
        middleware: Vec::new(),
        tags: Vec::new(),
        config_schema: None,
        result_schema: None,
        config_merger: None,
        overrides: Vec::new(),
        meta: Value::Null,
    }
}

/// Fluent builder produced by [`resource`].
pub struct ResourceBuilder {
    id: ItemId,
    init: Option<ResourceInitFn>,
    dispose: Option<ResourceDisposeFn>,
    register: Vec<RegistrableItem>,
    register_fn: Option<RegisterFn>,
    dependencies: Vec<DependencyRef>,
    middleware: Vec<ResourceMiddlewareAttachment>,
    tags: Vec<TagRef>,
    config_schema: Option<Schema>,
    result_schema: Option<Schema>,
    config_merger: Option<ConfigMergerFn>,
    overrides: Vec<RegistrableItem>,
    meta: Value,
}

impl ResourceBuilder {
    /// Set the init body. The value can be any `Send + Sync` type; wrap it
    /// in an `Arc` and return it as [`AnyValue`].
    #[must_use]
    pub fn init<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Value, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<AnyValue>> + Send + 'static,
    {
        self.init = Some(Arc::new(move |config, deps| Box::pin(body(config, deps))));
        self
    }

    /// Set the disposer.
    #[must_use]
    pub fn dispose<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(AnyValue, Value, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<()>> + Send + 'static,
    {
        self.dispose = Some(Arc::new(move |value, config, deps| Box::pin(body(value, config, deps))));
        self
    }

    /// Register child items when this resource enters the store.
    #[must_use]
    pub fn register(mut self, items: impl IntoIterator<Item = RegistrableItem>) -> Self {
        self.register.extend(items);
        self
    }

    /// Register config-dependent child items.
    #[must_use]
    pub fn register_with(
        mut self,
        register: impl Fn(&Value) -> Vec<RegistrableItem> + Send + Sync + 'static,
    ) -> Self {
        self.register_fn = Some(Arc::new(register));
        self
    }

    /// Declare dependencies.
    #[must_use]
    pub fn dependencies(mut self, deps: impl IntoIterator<Item = DependencyRef>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Attach middleware around `init`, outermost first.
    #[must_use]
    pub fn middleware(
        mut self,
        middleware: impl IntoIterator<Item = ResourceMiddlewareAttachment>,
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

    /// Validate merged configs against `schema`.
    #[must_use]
    pub fn config_schema(mut self, schema: Schema) -> Self {
        self.config_schema = Some(schema);
        self
    }

    /// Validate JSON init values against `schema`.
    #[must_use]
    pub fn result_schema(mut self, schema: Schema) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Merge repeated `.with()` configs with `merger`.
    #[must_use]
    pub fn config_merger(
        mut self,
        merger: impl Fn(Value, Value) -> RunnerResult<Value> + Send + Sync + 'static,
    ) -> Self {
        self.config_merger = Some(Arc::new(merger));
        self
    }

    /// Replace existing registrations by id once the tree is loaded.
    #[must_use]
    pub fn overrides(mut self, items: impl IntoIterator<Item = RegistrableItem>) -> Self {
        self.overrides.extend(items);
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Freeze the definition.
    #[must_use]
    pub fn build(self) -> ResourceDefinition {
        ResourceDefinition {
            id: self.id,
            init: self.init,
            dispose: self.dispose,
            register: self.register,
            register_fn: self.register_fn,
            dependencies: self.dependencies,
            middleware: self.middleware,
            tags: self.tags,
            config_schema: self.config_schema,
            result_schema: self.result_schema,
            config_merger: self.config_merger,
            overrides: self.overrides,
            meta: self.meta,
        }
    }
}
