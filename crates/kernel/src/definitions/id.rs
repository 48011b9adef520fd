//! Item identifiers and kinds.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Globally unique identifier of a registrable item.
///
/// Ids live in one flat namespace across all kinds; cloning is an `Arc`
/// bump.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId(Arc<str>);

impl ItemId {
    /// New id from any string-ish value.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ItemId({})", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&ItemId> for ItemId {
    fn from(id: &ItemId) -> Self {
        id.clone()
    }
}

impl Serialize for ItemId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(String::deserialize(deserializer)?))
    }
}

/// The seven registrable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    /// Awaitable unit of work.
    Task,
    /// Managed singleton with init/dispose.
    Resource,
    /// Typed pub/sub channel.
    Event,
    /// Declarative event listener.
    Hook,
    /// Interceptor around task execution.
    TaskMiddleware,
    /// Interceptor around resource initialization.
    ResourceMiddleware,
    /// Typed label.
    Tag,
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemKind::Task => "Task",
            ItemKind::Resource => "Resource",
            ItemKind::Event => "Event",
            ItemKind::Hook => "Hook",
            ItemKind::TaskMiddleware => "Task middleware",
            ItemKind::ResourceMiddleware => "Resource middleware",
            ItemKind::Tag => "Tag",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_compare_by_content() {
        assert_eq!(ItemId::new("app.db"), ItemId::from("app.db"));
        assert_ne!(ItemId::new("app.db"), ItemId::new("app.cache"));
    }

    #[test]
    fn kind_names_read_like_prose() {
        assert_eq!(ItemKind::Task.to_string(), "Task");
        assert_eq!(ItemKind::TaskMiddleware.to_string(), "Task middleware");
    }
}
