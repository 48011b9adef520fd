//! Hook definitions: declarative event listeners.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use runner_error::RunnerResult;
use serde_json::Value;

use crate::definitions::{DependencyRef, EventDefinition, ItemId};
use crate::dependencies::Dependencies;
use crate::events::Emission;

/// What a hook listens to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookTarget {
    /// One specific event.
    Event(ItemId),
    /// Every event (`on: "*"`).
    Star,
}

/// A hook body: `(emission, deps)`.
pub type HookFn =
    Arc<dyn Fn(Emission, Dependencies) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync>;

/// A hook: an ordered listener with declared dependencies.
#[derive(Clone)]
pub struct HookDefinition {
    /// Unique id.
    pub id: ItemId,
    /// The event (or `*`) this hook listens to.
    pub on: HookTarget,
    /// Dispatch position; lower runs earlier, ties break by registration
    /// order.
    pub order: i32,
    /// Declared dependencies.
    pub dependencies: Vec<DependencyRef>,
    pub(crate) run: HookFn,
    /// Free-form metadata.
    pub meta: Value,
}

impl std::fmt::Debug for HookDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookDefinition")
            .field("id", &self.id)
            .field("on", &self.on)
            .field("order", &self.order)
            .finish()
    }
}

impl HookDefinition {
    pub(crate) fn run_fn(&self) -> HookFn {
        Arc::clone(&self.run)
    }
}

/// Definer for a hook.
#[must_use]
pub fn hook(id: impl Into<ItemId>) -> HookBuilder {
    HookBuilder {
        id: id.into(),
        on: None,
        order: 0,
        dependencies: Vec::new(),
        run: None,
        meta: Value::Null,
    }
}

/// Fluent builder produced by [`hook`].
pub struct HookBuilder {
    id: ItemId,
    on: Option<HookTarget>,
    order: i32,
    dependencies: Vec<DependencyRef>,
    run: Option<HookFn>,
    meta: Value,
}

impl HookBuilder {
    /// Listen to a specific event.
    #[must_use]
    pub fn on(mut self, event: &EventDefinition) -> Self {
        self.on = Some(HookTarget::Event(event.id.clone()));
        self
    }

    /// Listen to a specific event by id.
    #[must_use]
    pub fn on_id(mut self, event_id: impl Into<ItemId>) -> Self {
        self.on = Some(HookTarget::Event(event_id.into()));
        self
    }

    /// Listen to every event.
    #[must_use]
    pub fn on_any(mut self) -> Self {
        self.on = Some(HookTarget::Star);
        self
    }

    /// Set the dispatch position.
    #[must_use]
    pub fn order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Declare dependencies.
    #[must_use]
    pub fn dependencies(mut self, deps: impl IntoIterator<Item = DependencyRef>) -> Self {
        self.dependencies.extend(deps);
        self
    }

    /// Set the body.
    #[must_use]
    pub fn run<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Emission, Dependencies) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<()>> + Send + 'static,
    {
        self.run = Some(Arc::new(move |emission, deps| Box::pin(body(emission, deps))));
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Freeze the definition. A hook without a target listens to nothing
    /// and is rejected at registration; a hook without a body is a no-op
    /// listener.
    #[must_use]
    pub fn build(self) -> HookDefinition {
        HookDefinition {
            id: self.id,
            on: self.on.unwrap_or(HookTarget::Star),
            order: self.order,
            dependencies: self.dependencies,
            run: self
                .run
                .unwrap_or_else(|| Arc::new(|_emission, _deps| Box::pin(async { Ok(()) }))),
            meta: self.meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::event;

    #[test]
    fn hook_targets_resolve() {
        let e = event("app.user_created").build();
        let h = hook("app.hooks.welcome").on(&e).order(5).build();
        assert_eq!(h.on, HookTarget::Event("app.user_created".into()));
        assert_eq!(h.order, 5);

        let star = hook("app.hooks.audit").on_any().build();
        assert_eq!(star.on, HookTarget::Star);
    }
}
