//! The event manager: listener registry, ordered dispatch, interception,
//! and emission-cycle detection.

mod emission;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::future::{join_all, BoxFuture};
use parking_lot::{Mutex, RwLock};
use runner_error::{RunnerError, RunnerResult};
use runner_platform::ContextStorage;

pub use emission::{Emission, EmissionControl, EventData};

use crate::definitions::{HookTarget, ItemId};
use crate::runtime::RuntimeServices;

/// A listener body.
pub type ListenerFn =
    Arc<dyn Fn(Emission) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync>;

/// Continuation handed to an emission interceptor.
pub type NextEmit =
    Arc<dyn Fn(Emission) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync>;

/// Wraps a whole emission: `(next, emission)`.
pub type EmissionInterceptorFn =
    Arc<dyn Fn(NextEmit, Emission) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync>;

/// Continuation handed to a hook interceptor.
pub type NextHookCall =
    Arc<dyn Fn(Emission) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync>;

/// Wraps one hook invocation: `(next, listener id, emission)`.
pub type HookInterceptorFn =
    Arc<dyn Fn(NextHookCall, ItemId, Emission) -> BoxFuture<'static, RunnerResult<()>> + Send + Sync>;

/// Gate deciding whether a listener sees an emission.
pub type ListenerFilter = Arc<dyn Fn(&Emission) -> bool + Send + Sync>;

/// One registered listener.
#[derive(Clone)]
pub struct ListenerEntry {
    /// Listener id (the hook id, or a synthetic id for programmatic
    /// listeners).
    pub id: ItemId,
    /// Dispatch position.
    pub order: i32,
    seq: u64,
    filter: Option<ListenerFilter>,
    handler: ListenerFn,
}

impl std::fmt::Debug for ListenerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Options for [`EventManager::emit`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Return a structured [`EmitReport`] instead of propagating listener
    /// errors.
    pub report: bool,
    /// Sequential dispatch: keep going after a listener fails.
    pub continue_on_error: bool,
}

impl EmitOptions {
    /// Request a structured report.
    #[must_use]
    pub fn reported() -> Self {
        Self { report: true, ..Self::default() }
    }
}

/// A failed listener inside an [`EmitReport`].
#[derive(Debug, Clone)]
pub struct ListenerError {
    /// Which listener failed.
    pub listener_id: ItemId,
    /// How it failed.
    pub error: RunnerError,
}

/// Structured outcome of an emission (when requested).
#[derive(Debug, Clone, Default)]
pub struct EmitReport {
    /// Listeners that were invoked, in dispatch order.
    pub listener_ids: Vec<ItemId>,
    /// Whether propagation was stopped before the end.
    pub stopped: bool,
    /// Per-listener failures.
    pub errors: Vec<ListenerError>,
}

/// Listener registry and dispatcher.
pub struct EventManager {
    services: Weak<RuntimeServices>,
    listeners: RwLock<HashMap<ItemId, Vec<ListenerEntry>>>,
    star: RwLock<Vec<ListenerEntry>>,
    emission_interceptors: RwLock<Vec<EmissionInterceptorFn>>,
    hook_interceptors: RwLock<Vec<HookInterceptorFn>>,
    locked: AtomicBool,
    runtime_cycle_detection: bool,
    emission_stack: ContextStorage,
    lifecycle_flag: ContextStorage,
    next_seq: AtomicU64,
}

impl std::fmt::Debug for EventManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventManager")
            .field("events", &self.listeners.read().len())
            .field("star_listeners", &self.star.read().len())
            .field("locked", &self.locked.load(Ordering::SeqCst))
            .finish()
    }
}

impl EventManager {
    pub(crate) fn new(
        services: Weak<RuntimeServices>,
        emission_stack: ContextStorage,
        lifecycle_flag: ContextStorage,
        runtime_cycle_detection: bool,
    ) -> Self {
        Self {
            services,
            listeners: RwLock::new(HashMap::new()),
            star: RwLock::new(Vec::new()),
            emission_interceptors: RwLock::new(Vec::new()),
            hook_interceptors: RwLock::new(Vec::new()),
            locked: AtomicBool::new(false),
            runtime_cycle_detection,
            emission_stack,
            lifecycle_flag,
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a listener. Fails with `Locked` after [`EventManager::lock`].
    pub fn add_listener(
        &self,
        target: HookTarget,
        id: ItemId,
        order: i32,
        filter: Option<ListenerFilter>,
        handler: ListenerFn,
    ) -> RunnerResult<()> {
        if self.locked.load(Ordering::SeqCst) {
            return Err(RunnerError::locked("EventManager"));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let entry = ListenerEntry { id, order, seq, filter, handler };
        match target {
            HookTarget::Event(event_id) => {
                self.listeners.write().entry(event_id).or_default().push(entry);
            }
            HookTarget::Star => self.star.write().push(entry),
        }
        Ok(())
    }

    /// Register an emission interceptor (outermost-first call order).
    ///
    /// Unlike listeners, interceptors stay registrable after `lock()`:
    /// they wrap dispatch rather than extend the registry, and tooling
    /// attaches them against a booted runtime.
    pub fn intercept_emissions(&self, interceptor: EmissionInterceptorFn) {
        self.emission_interceptors.write().push(interceptor);
    }

    /// Register a hook interceptor wrapping each listener invocation.
    pub fn intercept_hooks(&self, interceptor: HookInterceptorFn) {
        self.hook_interceptors.write().push(interceptor);
    }

    /// Refuse further registrations.
    pub fn lock(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    /// Drop every listener and interceptor, locked or not.
    pub fn dispose(&self) {
        self.listeners.write().clear();
        self.star.write().clear();
        self.emission_interceptors.write().clear();
        self.hook_interceptors.write().clear();
    }

    /// Whether the current task is inside a lifecycle dispatch.
    pub(crate) fn in_lifecycle_dispatch(&self) -> bool {
        matches!(self.lifecycle_flag.get::<()>(), Ok(Some(_)))
    }

    fn cycle_detection_active(&self) -> bool {
        self.runtime_cycle_detection && self.emission_stack.is_supported()
    }

    /// Emit `data` on `event_id`.
    ///
    /// Returns `Ok(Some(report))` when `options.report` is set; otherwise
    /// listener failures propagate (first error wins; parallel peers still
    /// run to completion).
    pub async fn emit(
        &self,
        event_id: &ItemId,
        data: EventData,
        source: ItemId,
        options: EmitOptions,
    ) -> RunnerResult<Option<EmitReport>> {
        self.emit_inner(event_id, data, source, options, false).await
    }

    /// Kernel lifecycle emissions: dispatch runs under the lifecycle flag
    /// so lifecycle listeners cannot re-trigger lifecycle events.
    pub(crate) async fn emit_lifecycle(
        &self,
        event_id: &ItemId,
        data: EventData,
        source: ItemId,
        options: EmitOptions,
    ) -> RunnerResult<Option<EmitReport>> {
        self.emit_inner(event_id, data, source, options, true).await
    }

    async fn emit_inner(
        &self,
        event_id: &ItemId,
        data: EventData,
        source: ItemId,
        options: EmitOptions,
        lifecycle: bool,
    ) -> RunnerResult<Option<EmitReport>> {
        let services =
            self.services.upgrade().ok_or_else(|| RunnerError::disposed("Runtime"))?;
        let definition = services.store.event(event_id)?;

        if let (Some(schema), Some(json)) = (&definition.payload_schema, data.as_json()) {
            schema.check(json).map_err(|cause| {
                RunnerError::validation("Event payload", event_id.as_str(), cause)
            })?;
        }

        let emission = Emission::new(
            event_id.clone(),
            data,
            definition.meta.clone(),
            definition.tags.iter().map(|t| t.id().clone()).collect(),
            source,
        );
        let original_control = Arc::clone(&emission.control);

        // Snapshot the registry: dispatch reads a consistent view even if
        // the registry is disposed mid-flight.
        let mut entries: Vec<ListenerEntry> = {
            let listeners = self.listeners.read();
            let star = self.star.read();
            let mut entries: Vec<ListenerEntry> =
                listeners.get(event_id).cloned().unwrap_or_default();
            entries.extend(star.iter().cloned());
            entries
        };
        entries.sort_by_key(|e| (e.order, e.seq));

        let report = Arc::new(Mutex::new(EmitReport::default()));
        let hook_interceptors: Vec<HookInterceptorFn> = self.hook_interceptors.read().clone();
        let parallel = definition.parallel;
        let continue_on_error = options.continue_on_error;

        let dispatch: NextEmit = {
            let report = Arc::clone(&report);
            Arc::new(move |emission: Emission| {
                let entries = entries.clone();
                let hook_interceptors = hook_interceptors.clone();
                let report = Arc::clone(&report);
                let original_control = Arc::clone(&original_control);
                Box::pin(async move {
                    if !Arc::ptr_eq(&emission.control, &original_control) {
                        return Err(RunnerError::validation(
                            "Emission interceptor",
                            emission.event_id.as_str(),
                            "Interceptors cannot override stopPropagation/isPropagationStopped",
                        ));
                    }
                    dispatch_entries(
                        entries,
                        hook_interceptors,
                        parallel,
                        continue_on_error,
                        report,
                        emission,
                    )
                    .await
                })
            })
        };

        let mut chain: NextEmit = dispatch;
        {
            let interceptors = self.emission_interceptors.read().clone();
            for interceptor in interceptors.into_iter().rev() {
                let inner = chain;
                chain = Arc::new(move |emission| {
                    let interceptor = Arc::clone(&interceptor);
                    let inner = Arc::clone(&inner);
                    Box::pin(async move { interceptor(inner, emission).await })
                });
            }
        }

        self.run_chain(event_id, lifecycle, chain, emission).await?;

        let outcome = report.lock().clone();
        if options.report {
            return Ok(Some(outcome));
        }
        if let Some(first) = outcome.errors.first() {
            return Err(first.error.clone());
        }
        Ok(None)
    }

    /// Run the interceptor chain under the lifecycle flag and the
    /// per-emission cycle-detection stack.
    async fn run_chain(
        &self,
        event_id: &ItemId,
        lifecycle: bool,
        chain: NextEmit,
        emission: Emission,
    ) -> RunnerResult<()> {
        let lifecycle_flag =
            (lifecycle && self.lifecycle_flag.is_supported()).then(|| self.lifecycle_flag.clone());

        if self.cycle_detection_active() {
            let stack: Vec<ItemId> = self
                .emission_stack
                .get::<Vec<ItemId>>()
                .ok()
                .flatten()
                .map(|s| (*s).clone())
                .unwrap_or_default();
            if stack.contains(event_id) {
                let mut chain_ids: Vec<String> = stack.iter().map(ToString::to_string).collect();
                chain_ids.push(event_id.to_string());
                return Err(RunnerError::EventEmissionCycle { chain: chain_ids });
            }
            let mut next_stack = stack;
            next_stack.push(event_id.clone());
            let storage = self.emission_stack.clone();
            let fut = run_flagged(lifecycle_flag, chain, emission);
            return storage.scope(Arc::new(next_stack), fut).await?;
        }

        run_flagged(lifecycle_flag, chain, emission).await
    }
}

async fn run_flagged(
    lifecycle_flag: Option<ContextStorage>,
    chain: NextEmit,
    emission: Emission,
) -> RunnerResult<()> {
    match lifecycle_flag {
        Some(flag) => flag.scope(Arc::new(()), chain(emission)).await?,
        None => chain(emission).await,
    }
}

async fn dispatch_entries(
    entries: Vec<ListenerEntry>,
    hook_interceptors: Vec<HookInterceptorFn>,
    parallel: bool,
    continue_on_error: bool,
    report: Arc<Mutex<EmitReport>>,
    emission: Emission,
) -> RunnerResult<()> {
    let callable: Vec<ListenerEntry> = entries
        .into_iter()
        .filter(|entry| entry.filter.as_ref().is_none_or(|f| f(&emission)))
        .collect();

    if parallel {
        {
            let mut report = report.lock();
            for entry in &callable {
                report.listener_ids.push(entry.id.clone());
            }
        }
        let futures: Vec<_> = callable
            .iter()
            .map(|entry| invoke_listener(entry, &hook_interceptors, emission.clone()))
            .collect();
        let results = join_all(futures).await;
        let mut report = report.lock();
        for (entry, result) in callable.iter().zip(results) {
            if let Err(error) = result {
                report.errors.push(ListenerError { listener_id: entry.id.clone(), error });
            }
        }
        report.stopped = emission.is_propagation_stopped();
    } else {
        for entry in &callable {
            if emission.is_propagation_stopped() {
                break;
            }
            report.lock().listener_ids.push(entry.id.clone());
            if let Err(error) = invoke_listener(entry, &hook_interceptors, emission.clone()).await {
                report
                    .lock()
                    .errors
                    .push(ListenerError { listener_id: entry.id.clone(), error });
                if !continue_on_error {
                    break;
                }
            }
        }
        report.lock().stopped = emission.is_propagation_stopped();
    }
    Ok(())
}

fn invoke_listener(
    entry: &ListenerEntry,
    hook_interceptors: &[HookInterceptorFn],
    emission: Emission,
) -> BoxFuture<'static, RunnerResult<()>> {
    let mut next: NextHookCall = Arc::clone(&entry.handler);
    for interceptor in hook_interceptors.iter().rev() {
        let inner = next;
        let interceptor = Arc::clone(interceptor);
        let listener_id = entry.id.clone();
        next = Arc::new(move |emission| {
            let interceptor = Arc::clone(&interceptor);
            let inner = Arc::clone(&inner);
            let listener_id = listener_id.clone();
            Box::pin(async move { interceptor(inner, listener_id, emission).await })
        });
    }
    next(emission)
}
