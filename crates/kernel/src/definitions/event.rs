//! Event definitions: named, typed pub/sub channels.

use serde_json::Value;

use crate::definitions::{ItemId, Schema, TagRef};

/// An event channel.
#[derive(Clone)]
pub struct EventDefinition {
    /// Unique id.
    pub id: ItemId,
    /// Dispatch listeners concurrently (`true`, the default) or
    /// sequentially with `stop_propagation` support.
    pub parallel: bool,
    /// Optional schema for JSON payloads.
    pub payload_schema: Option<Schema>,
    /// Free-form metadata, snapshotted into each emission.
    pub meta: Value,
    /// Tags, snapshotted into each emission.
    pub tags: Vec<TagRef>,
}

impl std::fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDefinition")
            .field("id", &self.id)
            .field("parallel", &self.parallel)
            .finish()
    }
}

/// Definer for an event.
#[must_use]
pub fn event(id: impl Into<ItemId>) -> EventBuilder {
    EventBuilder {
        id: id.into(),
        parallel: true,
        payload_schema: None,
        meta: Value::Null,
        tags: Vec::new(),
    }
}

/// Fluent builder produced by [`event`].
pub struct EventBuilder {
    id: ItemId,
    parallel: bool,
    payload_schema: Option<Schema>,
    meta: Value,
    tags: Vec<TagRef>,
}

impl EventBuilder {
    /// Dispatch listeners sequentially, honouring `stop_propagation`.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Set concurrent (`true`) or sequential (`false`) dispatch.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Validate JSON payloads against `schema` before dispatch.
    #[must_use]
    pub fn payload_schema(mut self, schema: Schema) -> Self {
        self.payload_schema = Some(schema);
        self
    }

    /// Attach free-form metadata.
    #[must_use]
    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Attach tags.
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = TagRef>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Freeze the definition.
    #[must_use]
    pub fn build(self) -> EventDefinition {
        EventDefinition {
            id: self.id,
            parallel: self.parallel,
            payload_schema: self.payload_schema,
            meta: self.meta,
            tags: self.tags,
        }
    }
}
