//! Dependency resolution: initialization order, cycle detection, missing
//! dependencies, and the static event-emission graph used by dry runs.

use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::definitions::{DependencyRef, HookTarget, ItemId, ItemKind};
use crate::store::Store;

/// A declared dependency with no matching registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependency {
    /// Who declared it.
    pub consumer: ItemId,
    /// Kind-qualified key, e.g. `Task app.fetch`.
    pub key: String,
}

/// Output of [`resolve`].
#[derive(Debug, Default)]
pub struct Resolution {
    /// Resource ids in initialization order, leaves first.
    pub order: Vec<ItemId>,
    /// Every cycle, each rendered once as `a -> b -> ... -> a`.
    pub cycles: Vec<String>,
    /// Every dangling dependency reference.
    pub missing: Vec<MissingDependency>,
}

struct GraphBuilder {
    graph: DiGraph<ItemId, ()>,
    nodes: HashMap<ItemId, NodeIndex>,
}

impl GraphBuilder {
    fn new() -> Self {
        Self { graph: DiGraph::new(), nodes: HashMap::new() }
    }

    fn node(&mut self, id: &ItemId) -> NodeIndex {
        if let Some(index) = self.nodes.get(id) {
            return *index;
        }
        let index = self.graph.add_node(id.clone());
        self.nodes.insert(id.clone(), index);
        index
    }

    fn edge(&mut self, from: &ItemId, to: &ItemId) {
        let from = self.node(from);
        let to = self.node(to);
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
    }
}

/// Resolve the store's dependency graph.
///
/// The graph spans tasks, resources, hooks and middleware; edges run from
/// consumer to dependency, plus target → middleware edges so a middleware
/// depending on what it wraps closes a detectable cycle. Event
/// dependencies are existence-checked but create no ordering edges.
pub fn resolve(store: &Store) -> Resolution {
    let mut missing = Vec::new();
    let mut builder = GraphBuilder::new();

    let check_dep = |store: &Store, missing: &mut Vec<MissingDependency>, consumer: &ItemId, dep: &DependencyRef| -> bool {
        let found = match dep.kind() {
            ItemKind::Task => store.task(dep.id()).is_ok(),
            ItemKind::Resource => store.resource(dep.id()).is_ok(),
            ItemKind::Event => store.event(dep.id()).is_ok(),
            _ => false,
        };
        if !found {
            missing.push(MissingDependency {
                consumer: consumer.clone(),
                key: format!("{} {}", dep.kind(), dep.id()),
            });
        }
        found
    };

    // Tasks: declared deps + attached middleware.
    for record in store.all_tasks() {
        let id = &record.definition.id;
        builder.node(id);
        for dep in &record.definition.dependencies {
            if check_dep(store, &mut missing, id, dep) && dep.kind() != ItemKind::Event {
                builder.edge(id, dep.id());
            }
        }
        for attachment in &record.definition.middleware {
            let mw_id = &attachment.definition.id;
            if store.task_middleware(mw_id).is_ok() {
                builder.edge(id, mw_id);
            } else {
                missing.push(MissingDependency {
                    consumer: id.clone(),
                    key: format!("{} {mw_id}", ItemKind::TaskMiddleware),
                });
            }
        }
    }

    // Resources: declared deps + attached and globally-applicable
    // resource middleware.
    let global_resource_mw: Vec<_> = store.all_resource_middleware();
    for record in store.all_resources() {
        let id = &record.definition.id;
        builder.node(id);
        for dep in &record.definition.dependencies {
            if check_dep(store, &mut missing, id, dep) && dep.kind() != ItemKind::Event {
                builder.edge(id, dep.id());
            }
        }
        for attachment in &record.definition.middleware {
            let mw_id = &attachment.definition.id;
            if store.resource_middleware(mw_id).is_ok() {
                builder.edge(id, mw_id);
            } else {
                missing.push(MissingDependency {
                    consumer: id.clone(),
                    key: format!("{} {mw_id}", ItemKind::ResourceMiddleware),
                });
            }
        }
        for mw in &global_resource_mw {
            if mw.definition.scope.applies_to(&record.definition) {
                builder.edge(id, &mw.definition.id);
            }
        }
    }

    // Hooks: declared deps + target event existence.
    for record in store.all_hooks() {
        let id = &record.definition.id;
        builder.node(id);
        if let HookTarget::Event(event_id) = &record.definition.on {
            if store.event(event_id).is_err() {
                missing.push(MissingDependency {
                    consumer: id.clone(),
                    key: format!("{} {event_id}", ItemKind::Event),
                });
            }
        }
        for dep in &record.definition.dependencies {
            if check_dep(store, &mut missing, id, dep) && dep.kind() != ItemKind::Event {
                builder.edge(id, dep.id());
            }
        }
    }

    // Middleware: declared deps.
    for record in store.all_task_middleware() {
        let id = &record.definition.id;
        builder.node(id);
        for dep in &record.definition.dependencies {
            if check_dep(store, &mut missing, id, dep) && dep.kind() != ItemKind::Event {
                builder.edge(id, dep.id());
            }
        }
    }
    for record in store.all_resource_middleware() {
        let id = &record.definition.id;
        builder.node(id);
        for dep in &record.definition.dependencies {
            if check_dep(store, &mut missing, id, dep) && dep.kind() != ItemKind::Event {
                builder.edge(id, dep.id());
            }
        }
    }

    let (order_all, cycles) = order_and_cycles(&builder.graph);
    let resources: HashSet<ItemId> =
        store.all_resources().iter().map(|r| r.definition.id.clone()).collect();
    let order = order_all.into_iter().filter(|id| resources.contains(id)).collect();

    Resolution { order, cycles, missing }
}

/// Flattened reverse-topological order plus rendered cycles.
fn order_and_cycles(graph: &DiGraph<ItemId, ()>) -> (Vec<ItemId>, Vec<String>) {
    let sccs = tarjan_scc(graph);
    let mut order = Vec::new();
    let mut cycles = Vec::new();

    // tarjan_scc yields SCCs with dependencies before dependents, which is
    // exactly leaves-first initialization order.
    for scc in &sccs {
        if scc.len() > 1 {
            cycles.push(render_cycle(graph, scc));
        }
        let mut ids: Vec<ItemId> = scc.iter().map(|n| graph[*n].clone()).collect();
        ids.sort();
        order.extend(ids);
    }

    // Self-loops are singleton SCCs; surface each exactly once.
    for node in graph.node_indices() {
        if graph.contains_edge(node, node) {
            let id = &graph[node];
            cycles.push(format!("{id} -> {id}"));
        }
    }

    cycles.sort();
    (order, cycles)
}

/// Render one cycle inside `scc` as `a -> b -> ... -> a`, starting at the
/// smallest id for determinism.
fn render_cycle(graph: &DiGraph<ItemId, ()>, scc: &[NodeIndex]) -> String {
    let in_scc: HashSet<NodeIndex> = scc.iter().copied().collect();
    let mut nodes: Vec<NodeIndex> = scc.to_vec();
    nodes.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
    let start = nodes[0];

    // BFS from `start` back to `start`, expanding neighbors in id order so
    // the reported path is stable.
    let mut pred: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    let mut closer = None;

    'bfs: while let Some(u) = queue.pop_front() {
        let mut neighbors: Vec<NodeIndex> =
            graph.neighbors(u).filter(|v| in_scc.contains(v)).collect();
        neighbors.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
        for v in neighbors {
            if v == start {
                if u == start {
                    // Self-loop on the start node; reported separately.
                    continue;
                }
                closer = Some(u);
                break 'bfs;
            }
            if visited.insert(v) {
                pred.insert(v, u);
                queue.push_back(v);
            }
        }
    }

    let mut path = vec![start];
    if let Some(mut u) = closer {
        let mut tail = Vec::new();
        while u != start {
            tail.push(u);
            u = pred[&u];
        }
        tail.reverse();
        path.extend(tail);
    }
    path.push(start);

    path.iter().map(|n| graph[*n].to_string()).collect::<Vec<_>>().join(" -> ")
}

/// Build the static emission graph (hook targets → events the hook can
/// emit) and return every cycle as a node path.
///
/// Used by dry runs to reject emission cycles before anything runs.
pub fn detect_event_cycles(store: &Store) -> Vec<Vec<ItemId>> {
    let events = store.all_events();
    let mut builder = GraphBuilder::new();
    for event in &events {
        builder.node(&event.id);
    }

    for record in store.all_hooks() {
        let emits: Vec<&ItemId> = record
            .definition
            .dependencies
            .iter()
            .filter(|dep| dep.kind() == ItemKind::Event)
            .map(DependencyRef::id)
            .collect();
        if emits.is_empty() {
            continue;
        }
        let targets: Vec<ItemId> = match &record.definition.on {
            HookTarget::Event(id) => vec![id.clone()],
            HookTarget::Star => events.iter().map(|e| e.id.clone()).collect(),
        };
        for target in &targets {
            for emit in &emits {
                let from = builder.node(target);
                let to = builder.node(emit);
                if from == to {
                    // A hook on E that can emit E: immediate cycle.
                    if !builder.graph.contains_edge(from, to) {
                        builder.graph.add_edge(from, to, ());
                    }
                } else {
                    builder.edge(target, emit);
                }
            }
        }
    }

    let mut cycles = Vec::new();
    for scc in tarjan_scc(&builder.graph) {
        if scc.len() > 1 {
            let rendered = render_cycle(&builder.graph, &scc);
            cycles.push(
                rendered.split(" -> ").map(ItemId::from).collect::<Vec<ItemId>>(),
            );
        }
    }
    for node in builder.graph.node_indices() {
        if builder.graph.contains_edge(node, node) {
            let id = builder.graph[node].clone();
            cycles.push(vec![id.clone(), id]);
        }
    }
    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{event, hook, resource, task, DependencyRef};
    use pretty_assertions::assert_eq;

    #[test]
    fn acyclic_graph_orders_leaves_first() {
        let store = Store::bare();
        let leaf = resource("r.leaf").build();
        let mid =
            resource("r.mid").dependencies([DependencyRef::resource("r.leaf")]).build();
        let top = resource("r.top").dependencies([DependencyRef::resource("r.mid")]).build();
        store.add_item(top.into()).unwrap();
        store.add_item(mid.into()).unwrap();
        store.add_item(leaf.into()).unwrap();

        let resolution = resolve(&store);
        assert!(resolution.cycles.is_empty());
        assert!(resolution.missing.is_empty());

        let order = resolution.order;
        let position =
            |id: &str| order.iter().position(|x| x.as_str() == id).expect("in order");
        assert!(position("r.leaf") < position("r.mid"));
        assert!(position("r.mid") < position("r.top"));
    }

    #[test]
    fn mutual_cycle_is_rendered_from_smallest_id() {
        let store = Store::bare();
        store
            .add_item(task("A").dependencies([DependencyRef::task("B")]).build().into())
            .unwrap();
        store
            .add_item(task("B").dependencies([DependencyRef::task("A")]).build().into())
            .unwrap();

        let resolution = resolve(&store);
        assert_eq!(resolution.cycles, vec!["A -> B -> A".to_string()]);
    }

    #[test]
    fn all_cycles_and_self_loops_are_reported() {
        let store = Store::bare();
        store
            .add_item(task("A").dependencies([DependencyRef::task("B")]).build().into())
            .unwrap();
        store
            .add_item(task("B").dependencies([DependencyRef::task("A")]).build().into())
            .unwrap();
        store
            .add_item(task("C").dependencies([DependencyRef::task("C")]).build().into())
            .unwrap();
        store
            .add_item(task("D").dependencies([DependencyRef::task("E")]).build().into())
            .unwrap();
        store
            .add_item(task("E").dependencies([DependencyRef::task("D")]).build().into())
            .unwrap();

        let resolution = resolve(&store);
        assert_eq!(
            resolution.cycles,
            vec!["A -> B -> A".to_string(), "C -> C".to_string(), "D -> E -> D".to_string()]
        );
    }

    #[test]
    fn missing_dependencies_name_kind_and_id() {
        let store = Store::bare();
        store
            .add_item(
                task("app.consumer")
                    .dependencies([
                        DependencyRef::task("app.ghost"),
                        DependencyRef::resource("app.db"),
                    ])
                    .build()
                    .into(),
            )
            .unwrap();

        let resolution = resolve(&store);
        let keys: Vec<&str> = resolution.missing.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["Task app.ghost", "Resource app.db"]);
    }

    #[test]
    fn middleware_depending_on_wrapped_resource_is_a_cycle() {
        let store = Store::bare();
        let mw = crate::definitions::resource_middleware("mw.wrap")
            .dependencies([DependencyRef::resource("r.target")])
            .build();
        let target = resource("r.target").middleware([(&mw).into()]).build();
        store.add_item(mw.into()).unwrap();
        store.add_item(target.into()).unwrap();

        let resolution = resolve(&store);
        assert_eq!(resolution.cycles.len(), 1);
        assert!(resolution.cycles[0].contains("mw.wrap"));
        assert!(resolution.cycles[0].contains("r.target"));
    }

    #[test]
    fn static_event_graph_finds_hook_cycles() {
        let store = Store::bare();
        store.add_item(event("evt.a").build().into()).unwrap();
        store.add_item(event("evt.b").build().into()).unwrap();
        // Hook on A may emit B; hook on B may emit A.
        store
            .add_item(
                hook("h.ab").on_id("evt.a").dependencies([DependencyRef::event("evt.b")]).build().into(),
            )
            .unwrap();
        store
            .add_item(
                hook("h.ba").on_id("evt.b").dependencies([DependencyRef::event("evt.a")]).build().into(),
            )
            .unwrap();

        let cycles = detect_event_cycles(&store);
        assert_eq!(cycles.len(), 1);
        let chain: Vec<&str> = cycles[0].iter().map(ItemId::as_str).collect();
        assert_eq!(chain, vec!["evt.a", "evt.b", "evt.a"]);
    }

    #[test]
    fn hook_emitting_its_own_event_is_a_self_cycle() {
        let store = Store::bare();
        store.add_item(event("evt.loop").build().into()).unwrap();
        store
            .add_item(
                hook("h.loop")
                    .on_id("evt.loop")
                    .dependencies([DependencyRef::event("evt.loop")])
                    .build()
                    .into(),
            )
            .unwrap();

        let cycles = detect_event_cycles(&store);
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].len(), 2);
    }
}
