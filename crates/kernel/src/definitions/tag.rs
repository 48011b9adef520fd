//! Tags: typed labels with optional config and optional I/O contracts.

use std::sync::Arc;

use serde_json::Value;

use crate::definitions::{ItemId, Schema};

/// A tag definition.
///
/// Tags index tasks and resources in the store; attached to a task they
/// may additionally enforce input/result contracts through their schemas.
#[derive(Clone)]
pub struct TagDefinition {
    /// Unique id.
    pub id: ItemId,
    /// Free-form metadata.
    pub meta: Value,
    /// Contract applied to the input of tagged tasks.
    pub input_schema: Option<Schema>,
    /// Contract applied to the result of tagged tasks.
    pub result_schema: Option<Schema>,
}

impl std::fmt::Debug for TagDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagDefinition").field("id", &self.id).finish()
    }
}

impl TagDefinition {
    /// Attach this tag with a config value.
    #[must_use]
    pub fn with(&self, config: Value) -> TagRef {
        TagRef { definition: Arc::new(self.clone()), config: Some(config) }
    }
}

/// A tag attachment: the tag plus an optional per-attachment config.
#[derive(Clone)]
pub struct TagRef {
    /// The tag being attached.
    pub definition: Arc<TagDefinition>,
    /// Attachment-specific config, if any.
    pub config: Option<Value>,
}

impl TagRef {
    /// The attached tag's id.
    #[must_use]
    pub fn id(&self) -> &ItemId {
        &self.definition.id
    }
}

impl std::fmt::Debug for TagRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRef")
            .field("id", &self.definition.id)
            .field("configured", &self.config.is_some())
            .finish()
    }
}

impl From<TagDefinition> for TagRef {
    fn from(definition: TagDefinition) -> Self {
        Self { definition: Arc::new(definition), config: None }
    }
}

impl From<&TagDefinition> for TagRef {
    fn from(definition: &TagDefinition) -> Self {
        Self { definition: Arc::new(definition.clone()), config: None }
    }
}

/// Definer for a tag.
#[must_use]
pub fn tag(id: impl Into<ItemId>) -> TagBuilder {
    TagBuilder {
        id: id.into(),
        meta: Value::Null,
        input_schema: None,
        result_schema: None,
    }
}

/// Fluent builder produced by [`tag`].
pub struct TagBuilder {
    id: ItemId,
    meta: Value,
    input_schema: Option<Schema>,
    result_schema: Option<Schema>,
}

impl TagBuilder {
    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Enforce an input contract on tagged tasks.
    #[must_use]
    pub fn input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Enforce a result contract on tagged tasks.
    #[must_use]
    pub fn result_schema(mut self, schema: Schema) -> Self {
        self.result_schema = Some(schema);
        self
    }

    /// Freeze the definition.
    #[must_use]
    pub fn build(self) -> TagDefinition {
        TagDefinition {
            id: self.id,
            meta: self.meta,
            input_schema: self.input_schema,
            result_schema: self.result_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn with_binds_config_to_the_attachment() {
        let cache_tag = tag("app.tags.cache").meta(json!({"team": "core"})).build();
        let plain: TagRef = (&cache_tag).into();
        assert!(plain.config.is_none());

        let configured = cache_tag.with(json!({"ttl": 60}));
        assert_eq!(configured.id().as_str(), "app.tags.cache");
        assert_eq!(configured.config.unwrap()["ttl"], 60);
    }
}
