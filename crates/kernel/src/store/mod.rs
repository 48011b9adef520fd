//! The authoritative registry of all items.

mod records;
mod registration;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use parking_lot::RwLock;
use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

pub use records::{
    ComposedTaskFn, HookRecord, ResourceMiddlewareRecord, ResourceRecord, ResourceState,
    TaskMiddlewareRecord, TaskRecord,
};
pub(crate) use registration::{load_tree, LoadOutcome};

use crate::definitions::{
    AnyValue, EventDefinition, ItemId, ItemKind, RegistrableItem, TagDefinition,
};

/// Registry of every item, keyed by id, one flat namespace across kinds.
///
/// The store is single-writer until [`Store::lock`]; after lock it is
/// read-only and any mutation fails with `Locked`. Built-in middleware,
/// resources, events and tags are registered at construction.
pub struct Store {
    tasks: RwLock<IndexMap<ItemId, Arc<TaskRecord>>>,
    resources: RwLock<IndexMap<ItemId, Arc<ResourceRecord>>>,
    events: RwLock<IndexMap<ItemId, Arc<EventDefinition>>>,
    hooks: RwLock<IndexMap<ItemId, Arc<HookRecord>>>,
    task_middleware: RwLock<IndexMap<ItemId, Arc<TaskMiddlewareRecord>>>,
    resource_middleware: RwLock<IndexMap<ItemId, Arc<ResourceMiddlewareRecord>>>,
    tags: RwLock<IndexMap<ItemId, Arc<TagDefinition>>>,
    /// First kind seen per id; duplicate detection reports this kind.
    owners: RwLock<HashMap<ItemId, ItemKind>>,
    root: RwLock<Option<ItemId>>,
    locked: AtomicBool,
}

impl Store {
    /// New store with the built-ins registered.
    #[must_use]
    pub fn new() -> Self {
        let store = Self::bare();
        for item in crate::builtins::items() {
            // Built-in ids are namespaced under `runner.`; collisions are a
            // kernel bug, not a user error.
            store
                .add_item(item)
                .unwrap_or_else(|e| unreachable!("builtin registration failed: {e}"));
        }
        store
    }

    /// New store without built-ins. Unit tests only.
    #[must_use]
    pub(crate) fn bare() -> Self {
        Self {
            tasks: RwLock::new(IndexMap::new()),
            resources: RwLock::new(IndexMap::new()),
            events: RwLock::new(IndexMap::new()),
            hooks: RwLock::new(IndexMap::new()),
            task_middleware: RwLock::new(IndexMap::new()),
            resource_middleware: RwLock::new(IndexMap::new()),
            tags: RwLock::new(IndexMap::new()),
            owners: RwLock::new(HashMap::new()),
            root: RwLock::new(None),
            locked: AtomicBool::new(false),
        }
    }

    /// Whether [`Store::lock`] ran.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// Freeze the registry; later mutations fail with `Locked`.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_root(&self, id: ItemId) {
        *self.root.write() = Some(id);
    }

    /// The root resource id, once a tree was loaded.
    #[must_use]
    pub fn root(&self) -> Option<ItemId> {
        self.root.read().clone()
    }

    /// Register one item. Fails on duplicates (any kind) and after lock.
    pub fn add_item(&self, item: RegistrableItem) -> RunnerResult<()> {
        if self.is_locked() {
            return Err(RunnerError::locked("Store"));
        }

        let id = item.id().clone();
        if let Some(first_kind) = self.owners.read().get(&id) {
            // The only sanctioned second registration: a configured
            // instance of an already-registered resource, merged by the
            // resource's own merger.
            if let RegistrableItem::ConfiguredResource { definition, config } = &item {
                if *first_kind == ItemKind::Resource {
                    return self.merge_configured(definition, config.clone());
                }
            }
            return Err(RunnerError::duplicate(first_kind.to_string(), id.as_str()));
        }

        self.owners.write().insert(id.clone(), item.kind());
        match item {
            RegistrableItem::Task(definition) => {
                self.tasks.write().insert(id, Arc::new(TaskRecord::new(definition)));
            }
            RegistrableItem::Resource(definition) => {
                self.resources.write().insert(id, Arc::new(ResourceRecord::new(definition, None)));
            }
            RegistrableItem::ConfiguredResource { definition, config } => {
                self.resources
                    .write()
                    .insert(id, Arc::new(ResourceRecord::new(definition, Some(config))));
            }
            RegistrableItem::Event(definition) => {
                self.events.write().insert(id, definition);
            }
            RegistrableItem::Hook(definition) => {
                self.hooks.write().insert(id, Arc::new(HookRecord::new(definition)));
            }
            RegistrableItem::TaskMiddleware(definition) => {
                self.task_middleware
                    .write()
                    .insert(id, Arc::new(TaskMiddlewareRecord::new(definition)));
            }
            RegistrableItem::ResourceMiddleware(definition) => {
                self.resource_middleware
                    .write()
                    .insert(id, Arc::new(ResourceMiddlewareRecord::new(definition)));
            }
            RegistrableItem::Tag(definition) => {
                self.tags.write().insert(id, definition);
            }
        }
        Ok(())
    }

    fn merge_configured(
        &self,
        definition: &Arc<crate::definitions::ResourceDefinition>,
        config: Value,
    ) -> RunnerResult<()> {
        let resources = self.resources.read();
        let record = resources.get(&definition.id).ok_or_else(|| {
            RunnerError::internal(format!(
                "owner map lists resource {} but no record exists",
                definition.id
            ))
        })?;
        let Some(merger) = record.definition.merger() else {
            return Err(RunnerError::duplicate(
                ItemKind::Resource.to_string(),
                definition.id.as_str(),
            ));
        };
        let mut slot = record.config.write();
        let merged = merger(slot.clone().unwrap_or(Value::Null), config)?;
        *slot = Some(merged);
        Ok(())
    }

    /// Replace a registration by id, preserving kind and position.
    pub fn apply_override(&self, item: RegistrableItem) -> RunnerResult<()> {
        if self.is_locked() {
            return Err(RunnerError::locked("Store"));
        }
        let id = item.id().clone();
        let existing_kind = self
            .owners
            .read()
            .get(&id)
            .copied()
            .ok_or_else(|| RunnerError::dependency_not_found(item.kind(), &id))?;
        if existing_kind != item.kind() {
            return Err(RunnerError::validation(
                "Override",
                id.as_str(),
                format!("kind mismatch: registered as {existing_kind}, override is {}", item.kind()),
            ));
        }

        match item {
            RegistrableItem::Task(definition) => {
                self.tasks.write().insert(id, Arc::new(TaskRecord::new(definition)));
            }
            RegistrableItem::Resource(definition) => {
                self.resources.write().insert(id, Arc::new(ResourceRecord::new(definition, None)));
            }
            RegistrableItem::ConfiguredResource { definition, config } => {
                self.resources
                    .write()
                    .insert(id, Arc::new(ResourceRecord::new(definition, Some(config))));
            }
            RegistrableItem::Event(definition) => {
                self.events.write().insert(id, definition);
            }
            RegistrableItem::Hook(definition) => {
                self.hooks.write().insert(id, Arc::new(HookRecord::new(definition)));
            }
            RegistrableItem::TaskMiddleware(definition) => {
                self.task_middleware
                    .write()
                    .insert(id, Arc::new(TaskMiddlewareRecord::new(definition)));
            }
            RegistrableItem::ResourceMiddleware(definition) => {
                self.resource_middleware
                    .write()
                    .insert(id, Arc::new(ResourceMiddlewareRecord::new(definition)));
            }
            RegistrableItem::Tag(definition) => {
                self.tags.write().insert(id, definition);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// The kind registered at `id`, if any.
    #[must_use]
    pub fn kind_of(&self, id: &ItemId) -> Option<ItemKind> {
        self.owners.read().get(id).copied()
    }

    /// Task record by id.
    pub fn task(&self, id: &ItemId) -> RunnerResult<Arc<TaskRecord>> {
        self.tasks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::dependency_not_found(ItemKind::Task, id))
    }

    /// Resource record by id.
    pub fn resource(&self, id: &ItemId) -> RunnerResult<Arc<ResourceRecord>> {
        self.resources
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::dependency_not_found(ItemKind::Resource, id))
    }

    /// Event definition by id.
    pub fn event(&self, id: &ItemId) -> RunnerResult<Arc<EventDefinition>> {
        self.events
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::EventNotFound { id: id.to_string() })
    }

    /// Hook record by id.
    pub fn hook(&self, id: &ItemId) -> RunnerResult<Arc<HookRecord>> {
        self.hooks
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::dependency_not_found(ItemKind::Hook, id))
    }

    /// Task middleware record by id.
    pub fn task_middleware(&self, id: &ItemId) -> RunnerResult<Arc<TaskMiddlewareRecord>> {
        self.task_middleware
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::dependency_not_found(ItemKind::TaskMiddleware, id))
    }

    /// Resource middleware record by id.
    pub fn resource_middleware(
        &self,
        id: &ItemId,
    ) -> RunnerResult<Arc<ResourceMiddlewareRecord>> {
        self.resource_middleware
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RunnerError::dependency_not_found(ItemKind::ResourceMiddleware, id))
    }

    /// The initialized value of a resource.
    pub fn resource_value(&self, id: &ItemId) -> RunnerResult<AnyValue> {
        let record = self.resource(id)?;
        record.value().ok_or_else(|| {
            RunnerError::validation(
                "Resource value",
                id.as_str(),
                "no value available (not initialized, or init was suppressed)",
            )
        })
    }

    // -----------------------------------------------------------------------
    // Iteration and indices
    // -----------------------------------------------------------------------

    /// All task records, registration order.
    #[must_use]
    pub fn all_tasks(&self) -> Vec<Arc<TaskRecord>> {
        self.tasks.read().values().cloned().collect()
    }

    /// All resource records, registration order.
    #[must_use]
    pub fn all_resources(&self) -> Vec<Arc<ResourceRecord>> {
        self.resources.read().values().cloned().collect()
    }

    /// All hook records, registration order.
    #[must_use]
    pub fn all_hooks(&self) -> Vec<Arc<HookRecord>> {
        self.hooks.read().values().cloned().collect()
    }

    /// All task middleware records, registration order.
    #[must_use]
    pub fn all_task_middleware(&self) -> Vec<Arc<TaskMiddlewareRecord>> {
        self.task_middleware.read().values().cloned().collect()
    }

    /// All resource middleware records, registration order.
    #[must_use]
    pub fn all_resource_middleware(&self) -> Vec<Arc<ResourceMiddlewareRecord>> {
        self.resource_middleware.read().values().cloned().collect()
    }

    /// All event definitions, registration order.
    #[must_use]
    pub fn all_events(&self) -> Vec<Arc<EventDefinition>> {
        self.events.read().values().cloned().collect()
    }

    /// Ids of tasks carrying `tag_id`.
    #[must_use]
    pub fn tasks_with_tag(&self, tag_id: &ItemId) -> Vec<ItemId> {
        self.tasks
            .read()
            .values()
            .filter(|r| r.definition.has_tag(tag_id))
            .map(|r| r.definition.id.clone())
            .collect()
    }

    /// Ids of resources carrying `tag_id`.
    #[must_use]
    pub fn resources_with_tag(&self, tag_id: &ItemId) -> Vec<ItemId> {
        self.resources
            .read()
            .values()
            .filter(|r| r.definition.has_tag(tag_id))
            .map(|r| r.definition.id.clone())
            .collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("tasks", &self.tasks.read().len())
            .field("resources", &self.resources.read().len())
            .field("events", &self.events.read().len())
            .field("hooks", &self.hooks.read().len())
            .field("locked", &self.is_locked())
            .finish()
    }
}
