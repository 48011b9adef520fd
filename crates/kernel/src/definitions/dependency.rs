//! Declared dependencies, referenced by id.
//!
//! Definitions never hold each other by value; a dependency is an id plus
//! the kind the consumer expects. The resolver maps ids to records after
//! the whole tree is loaded, which makes mutually-dependent declarations a
//! non-problem.

use crate::definitions::{ItemId, ItemKind};

/// One declared dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DependencyRef {
    /// The consumer needs a runnable task.
    Task(ItemId),
    /// The consumer needs an initialized resource value.
    Resource(ItemId),
    /// The consumer needs an emitter for this event.
    Event(ItemId),
}

impl DependencyRef {
    /// Shorthand for a task dependency.
    #[must_use]
    pub fn task(id: impl Into<ItemId>) -> Self {
        Self::Task(id.into())
    }

    /// Shorthand for a resource dependency.
    #[must_use]
    pub fn resource(id: impl Into<ItemId>) -> Self {
        Self::Resource(id.into())
    }

    /// Shorthand for an event dependency.
    #[must_use]
    pub fn event(id: impl Into<ItemId>) -> Self {
        Self::Event(id.into())
    }

    /// The referenced id.
    #[must_use]
    pub fn id(&self) -> &ItemId {
        match self {
            Self::Task(id) | Self::Resource(id) | Self::Event(id) => id,
        }
    }

    /// The kind the consumer expects at this id.
    #[must_use]
    pub fn kind(&self) -> ItemKind {
        match self {
            Self::Task(_) => ItemKind::Task,
            Self::Resource(_) => ItemKind::Resource,
            Self::Event(_) => ItemKind::Event,
        }
    }
}

impl From<&crate::definitions::TaskDefinition> for DependencyRef {
    fn from(task: &crate::definitions::TaskDefinition) -> Self {
        Self::Task(task.id.clone())
    }
}

impl From<&crate::definitions::ResourceDefinition> for DependencyRef {
    fn from(resource: &crate::definitions::ResourceDefinition) -> Self {
        Self::Resource(resource.id.clone())
    }
}

impl From<&crate::definitions::EventDefinition> for DependencyRef {
    fn from(event: &crate::definitions::EventDefinition) -> Self {
        Self::Event(event.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refs_expose_id_and_kind() {
        let dep = DependencyRef::resource("app.db");
        assert_eq!(dep.id().as_str(), "app.db");
        assert_eq!(dep.kind(), ItemKind::Resource);
    }
}
