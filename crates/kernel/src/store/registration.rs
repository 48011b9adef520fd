//! Walking a root resource's `register` tree into the store.

use std::collections::VecDeque;

use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

use crate::definitions::{ItemId, RegistrableItem};
use crate::store::Store;

/// What the walk produced besides store mutations.
#[derive(Debug)]
pub(crate) struct LoadOutcome {
    /// The root resource's id.
    pub root_id: ItemId,
    /// Overrides declared by walked resources, in walk order.
    pub overrides: Vec<RegistrableItem>,
}

/// Load `root` and everything it registers, breadth-first.
///
/// Overrides are only collected here; the caller applies them once the
/// whole tree is known.
pub(crate) fn load_tree(store: &Store, root: RegistrableItem) -> RunnerResult<LoadOutcome> {
    let root_id = root.id().clone();
    if !matches!(
        root,
        RegistrableItem::Resource(_) | RegistrableItem::ConfiguredResource { .. }
    ) {
        return Err(RunnerError::UnknownItemType {
            details: format!("run() requires a resource root, got {} \"{root_id}\"", root.kind()),
        });
    }

    let mut overrides = Vec::new();
    let mut queue = VecDeque::new();
    queue.push_back(root);

    while let Some(item) = queue.pop_front() {
        let (definition, config) = match &item {
            RegistrableItem::Resource(definition) => {
                (Some(definition.clone()), Value::Null)
            }
            RegistrableItem::ConfiguredResource { definition, config } => {
                (Some(definition.clone()), config.clone())
            }
            _ => (None, Value::Null),
        };

        store.add_item(item)?;

        if let Some(definition) = definition {
            overrides.extend(definition.overrides.iter().cloned());
            for child in definition.registrations(&config) {
                queue.push_back(child);
            }
        }
    }

    store.set_root(root_id.clone());
    Ok(LoadOutcome { root_id, overrides })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{event, resource, task};
    use serde_json::json;

    #[test]
    fn walk_registers_nested_children() {
        let store = Store::bare();
        let leaf = resource("app.leaf").build();
        let child = resource("app.child").register([leaf.into()]).build();
        let root = resource("app")
            .register([child.into(), task("app.work").build().into(), event("app.done").build().into()])
            .build();

        let outcome = load_tree(&store, root.into()).unwrap();
        assert_eq!(outcome.root_id.as_str(), "app");
        assert!(store.resource(&"app.leaf".into()).is_ok());
        assert!(store.task(&"app.work".into()).is_ok());
        assert!(store.event(&"app.done".into()).is_ok());
        assert_eq!(store.root().unwrap().as_str(), "app");
    }

    #[test]
    fn overrides_are_collected_not_applied() {
        let store = Store::bare();
        let original = task("app.work").meta(json!({"v": 1})).build();
        let replacement = task("app.work").meta(json!({"v": 2})).build();
        let root = resource("app")
            .register([original.into()])
            .overrides([replacement.into()])
            .build();

        let outcome = load_tree(&store, root.into()).unwrap();
        assert_eq!(outcome.overrides.len(), 1);
        // Not applied yet.
        let record = store.task(&"app.work".into()).unwrap();
        assert_eq!(record.definition.meta["v"], 1);
    }

    #[test]
    fn non_resource_root_is_rejected() {
        let store = Store::bare();
        let err = load_tree(&store, task("t").build().into()).unwrap_err();
        assert!(matches!(err, RunnerError::UnknownItemType { .. }));
    }

    #[test]
    fn duplicate_in_tree_surfaces_during_walk() {
        let store = Store::bare();
        let root = resource("app")
            .register([task("t").build().into(), task("t").build().into()])
            .build();
        let err = load_tree(&store, root.into()).unwrap_err();
        assert!(err.is_duplicate());
    }
}
