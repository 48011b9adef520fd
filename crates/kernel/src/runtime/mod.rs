//! The boot sequence: `run()` and the kernel services behind it.

mod result;

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use runner_error::{RunnerError, RunnerResult};
use runner_log::{Level, Logger};
use runner_platform::{ContextStorage, EnvMode, Platform, SignalBinding};
use serde_json::Value;

pub use result::{IdRef, RunResult};

use crate::definitions::{event, ItemId, RegistrableItem};
use crate::dependencies::Dependencies;
use crate::events::{EmitOptions, EventData, EventManager, ListenerFn};
use crate::graph;
use crate::init;
use crate::lifecycle::{
    self, task_after_run_id, task_before_run_id, task_on_error_id,
};
use crate::store::{load_tree, Store};
use crate::tasks::TaskRunner;

/// A tunnel's executor: `(task id, input) -> output`.
pub(crate) type TunnelRunFn =
    Arc<dyn Fn(ItemId, Value) -> BoxFuture<'static, RunnerResult<Value>> + Send + Sync>;

/// One claimed task route. Exclusive owner per task id.
pub(crate) struct TunnelRoute {
    pub(crate) owner: ItemId,
    pub(crate) run: TunnelRunFn,
}

/// Everything one `run()` constructs. Never shared between runs.
pub(crate) struct RuntimeServices {
    pub(crate) store: Store,
    pub(crate) events: EventManager,
    pub(crate) tasks: TaskRunner,
    pub(crate) logger: Logger,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) tunnels: DashMap<ItemId, TunnelRoute>,
    pub(crate) app_context: ContextStorage,
    disposed: AtomicBool,
    bindings: Mutex<Vec<SignalBinding>>,
}

impl RuntimeServices {
    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn push_binding(&self, binding: SignalBinding) {
        self.bindings.lock().push(binding);
    }

    pub(crate) fn drain_bindings(&self) -> Vec<SignalBinding> {
        self.bindings.lock().drain(..).collect()
    }
}

/// Verbosity of the boot logger when no explicit logger is passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugMode {
    /// Silent: records reach listeners, nothing prints.
    #[default]
    Off,
    /// Print `info` and above.
    Normal,
    /// Print everything.
    Verbose,
}

/// Options for [`run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Boot logger verbosity.
    pub debug: DebugMode,
    /// Build and validate without initializing resources or running
    /// hooks/tasks. Event-emission cycles are always checked in dry runs.
    pub dry_run: bool,
    /// Overrides applied after the tree is loaded, strongest-last.
    pub overrides: Vec<RegistrableItem>,
    /// Attach platform signal handlers that dispose the runtime.
    pub shutdown_hooks: bool,
    /// Detect event-emission cycles at emit time (always on in dry runs).
    pub runtime_event_cycle_detection: bool,
    /// Platform override; defaults to [`runner_platform::detect`].
    pub platform: Option<Arc<dyn Platform>>,
    /// Logger override; defaults to one built from `debug`.
    pub logger: Option<Logger>,
}

fn kernel_source() -> ItemId {
    ItemId::new("runner")
}

/// Boot an application from its root resource.
///
/// Loads the registration tree, applies overrides, resolves and checks
/// the dependency graph, initializes resources leaves-first, locks the
/// store, composes task chains, emits `runner.ready`, and hands back a
/// disposable [`RunResult`].
pub async fn run(
    root: impl Into<RegistrableItem>,
    options: RunOptions,
) -> RunnerResult<RunResult> {
    let root_item = root.into();
    let platform =
        options.platform.clone().unwrap_or_else(runner_platform::detect);
    platform.init().await?;

    let logger = options.logger.clone().unwrap_or_else(|| match options.debug {
        DebugMode::Off => Logger::silent(),
        DebugMode::Normal => Logger::builder().threshold(Level::Info).build(),
        DebugMode::Verbose => Logger::builder().threshold(Level::Trace).build(),
    });

    let cycle_detection = options.runtime_event_cycle_detection || options.dry_run;
    let services = Arc::new_cyclic(|weak: &Weak<RuntimeServices>| RuntimeServices {
        store: Store::new(),
        events: EventManager::new(
            weak.clone(),
            platform.context_storage(),
            platform.context_storage(),
            cycle_detection,
        ),
        tasks: TaskRunner::new(weak.clone()),
        logger: logger.clone(),
        platform: Arc::clone(&platform),
        tunnels: DashMap::new(),
        app_context: platform.context_storage(),
        disposed: AtomicBool::new(false),
        bindings: Mutex::new(Vec::new()),
    });

    // Load the registration tree, then apply overrides once the whole
    // tree is known (resource-declared first, caller-forced last).
    let outcome = load_tree(&services.store, root_item)?;
    for item in outcome.overrides {
        services.store.apply_override(item)?;
    }
    for item in options.overrides.clone() {
        services.store.apply_override(item)?;
    }

    // Every task gets its per-task lifecycle events.
    for record in services.store.all_tasks() {
        let id = &record.definition.id;
        for event_id in [task_before_run_id(id), task_after_run_id(id), task_on_error_id(id)] {
            services.store.add_item(event(event_id.as_str()).build().into())?;
        }
    }

    // Resolve: cycles and missing dependencies abort the boot.
    let resolution = graph::resolve(&services.store);
    if !resolution.cycles.is_empty() {
        return Err(RunnerError::CircularDependencies { cycles: resolution.cycles });
    }
    if let Some(missing) = resolution.missing.first() {
        return Err(RunnerError::DependencyNotFound { key: missing.key.clone() });
    }

    // Dry runs reject statically-detectable emission cycles before
    // anything could run.
    if options.dry_run {
        let cycles = graph::detect_event_cycles(&services.store);
        if let Some(first) = cycles.first() {
            return Err(RunnerError::EventEmissionCycle {
                chain: first.iter().map(ToString::to_string).collect(),
            });
        }
    }

    attach_dependencies(&services);
    register_hooks(&services)?;

    let mut initialized: Vec<ItemId> = Vec::new();
    let boot: RunnerResult<()> = async {
        if !options.dry_run {
            services
                .events
                .emit_lifecycle(
                    &ItemId::new(lifecycle::BEFORE_INIT),
                    EventData::Json(Value::Null),
                    kernel_source(),
                    EmitOptions::default(),
                )
                .await?;
            initialized = init::initialize_resources(&services, &resolution.order).await?;
            services
                .events
                .emit_lifecycle(
                    &ItemId::new(lifecycle::AFTER_INIT),
                    EventData::Json(Value::Null),
                    kernel_source(),
                    EmitOptions::default(),
                )
                .await?;
        }

        services.store.lock();
        services.events.lock();
        services.tasks.compose_all()?;

        if !options.dry_run {
            services
                .events
                .emit_lifecycle(
                    &ItemId::new(lifecycle::READY),
                    EventData::Json(Value::Null),
                    kernel_source(),
                    EmitOptions::default(),
                )
                .await?;
        }
        Ok(())
    }
    .await;

    if let Err(error) = boot {
        init::dispose_resources(&services, &initialized).await;
        services.events.dispose();
        return Err(error);
    }

    let result = RunResult::new(
        Arc::clone(&services),
        outcome.root_id.clone(),
        initialized,
        options.dry_run,
    );

    if options.shutdown_hooks {
        let handle = result.clone();
        let attach = platform.on_shutdown_signal(Arc::new(move || {
            let handle = handle.clone();
            tokio::spawn(async move {
                let _ = handle.dispose().await;
            });
        }));
        match attach {
            Ok(binding) => services.push_binding(binding),
            Err(error) => logger.warn(format!("shutdown hooks unavailable: {error}")),
        }
    }

    let mode = EnvMode::from_platform(platform.as_ref());
    logger.with_source("runner").info(format!(
        "booted \"{}\" in {mode} mode ({} resources initialized{})",
        outcome.root_id,
        result.initialized_count(),
        if options.dry_run { ", dry run" } else { "" }
    ));
    Ok(result)
}

fn attach_dependencies(services: &Arc<RuntimeServices>) {
    let weak = Arc::downgrade(services);
    for record in services.store.all_tasks() {
        let deps = Dependencies::new(
            record.definition.id.clone(),
            record.definition.dependencies.clone(),
            weak.clone(),
        );
        let _ = record.deps.set(deps);
    }
    for record in services.store.all_resources() {
        let deps = Dependencies::new(
            record.definition.id.clone(),
            record.definition.dependencies.clone(),
            weak.clone(),
        );
        let _ = record.deps.set(deps);
    }
    for record in services.store.all_hooks() {
        let deps = Dependencies::new(
            record.definition.id.clone(),
            record.definition.dependencies.clone(),
            weak.clone(),
        );
        let _ = record.deps.set(deps);
    }
    for record in services.store.all_task_middleware() {
        let deps = Dependencies::new(
            record.definition.id.clone(),
            record.definition.dependencies.clone(),
            weak.clone(),
        );
        let _ = record.deps.set(deps);
    }
    for record in services.store.all_resource_middleware() {
        let deps = Dependencies::new(
            record.definition.id.clone(),
            record.definition.dependencies.clone(),
            weak.clone(),
        );
        let _ = record.deps.set(deps);
    }
}

fn register_hooks(services: &Arc<RuntimeServices>) -> RunnerResult<()> {
    for record in services.store.all_hooks() {
        let deps = record.dependencies().ok_or_else(|| {
            RunnerError::internal(format!("hook {} has no resolved deps", record.definition.id))
        })?;
        let run = record.definition.run_fn();
        let handler: ListenerFn = Arc::new(move |emission| {
            let run = Arc::clone(&run);
            let deps = deps.clone();
            Box::pin(async move { run(emission, deps).await })
        });
        services.events.add_listener(
            record.definition.on.clone(),
            record.definition.id.clone(),
            record.definition.order,
            None,
            handler,
        )?;
    }
    Ok(())
}
