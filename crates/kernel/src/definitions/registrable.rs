//! The tagged union of everything the store accepts.

use std::sync::Arc;

use crate::definitions::{
    ConfiguredResource, EventDefinition, HookDefinition, ItemId, ItemKind,
    ResourceDefinition, ResourceMiddlewareDefinition, TagDefinition, TaskDefinition,
    TaskMiddlewareDefinition,
};

/// A registrable item, as it appears in `register` lists and overrides.
#[derive(Clone, Debug)]
pub enum RegistrableItem {
    /// A task.
    Task(Arc<TaskDefinition>),
    /// A raw resource.
    Resource(Arc<ResourceDefinition>),
    /// A resource paired with a config.
    ConfiguredResource {
        /// The underlying resource.
        definition: Arc<ResourceDefinition>,
        /// The bound config.
        config: serde_json::Value,
    },
    /// An event.
    Event(Arc<EventDefinition>),
    /// A hook.
    Hook(Arc<HookDefinition>),
    /// A task middleware.
    TaskMiddleware(Arc<TaskMiddlewareDefinition>),
    /// A resource middleware.
    ResourceMiddleware(Arc<ResourceMiddlewareDefinition>),
    /// A tag.
    Tag(Arc<TagDefinition>),
}

impl RegistrableItem {
    /// The item's id.
    #[must_use]
    pub fn id(&self) -> &ItemId {
        match self {
            Self::Task(d) => &d.id,
            Self::Resource(d) | Self::ConfiguredResource { definition: d, .. } => &d.id,
            Self::Event(d) => &d.id,
            Self::Hook(d) => &d.id,
            Self::TaskMiddleware(d) => &d.id,
            Self::ResourceMiddleware(d) => &d.id,
            Self::Tag(d) => &d.id,
        }
    }

    /// The item's kind. Configured resources are resources.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Task(_) => ItemKind::Task,
            Self::Resource(_) | Self::ConfiguredResource { .. } => ItemKind::Resource,
            Self::Event(_) => ItemKind::Event,
            Self::Hook(_) => ItemKind::Hook,
            Self::TaskMiddleware(_) => ItemKind::TaskMiddleware,
            Self::ResourceMiddleware(_) => ItemKind::ResourceMiddleware,
            Self::Tag(_) => ItemKind::Tag,
        }
    }
}

impl From<TaskDefinition> for RegistrableItem {
    fn from(d: TaskDefinition) -> Self {
        Self::Task(Arc::new(d))
    }
}

impl From<ResourceDefinition> for RegistrableItem {
    fn from(d: ResourceDefinition) -> Self {
        Self::Resource(Arc::new(d))
    }
}

impl From<ConfiguredResource> for RegistrableItem {
    fn from(c: ConfiguredResource) -> Self {
        Self::ConfiguredResource { definition: c.definition, config: c.config }
    }
}

impl From<EventDefinition> for RegistrableItem {
    fn from(d: EventDefinition) -> Self {
        Self::Event(Arc::new(d))
    }
}

impl From<HookDefinition> for RegistrableItem {
    fn from(d: HookDefinition) -> Self {
        Self::Hook(Arc::new(d))
    }
}

impl From<TaskMiddlewareDefinition> for RegistrableItem {
    fn from(d: TaskMiddlewareDefinition) -> Self {
        Self::TaskMiddleware(Arc::new(d))
    }
}

impl From<ResourceMiddlewareDefinition> for RegistrableItem {
    fn from(d: ResourceMiddlewareDefinition) -> Self {
        Self::ResourceMiddleware(Arc::new(d))
    }
}

impl From<TagDefinition> for RegistrableItem {
    fn from(d: TagDefinition) -> Self {
        Self::Tag(Arc::new(d))
    }
}
