//! Built-in lifecycle events and their payloads.
//!
//! Payloads ride as opaque emission data because they carry live handles:
//! a [`SuppressFlag`] lets `on_error` listeners swallow a failure, an
//! [`OutputHandle`] lets `after_run` listeners rewrite a task's output.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use runner_error::RunnerError;
use serde_json::Value;

use crate::definitions::{event, ItemId, RegistrableItem};

/// Emitted once the kernel is booted and the store is locked.
pub const READY: &str = "runner.ready";
/// Bookends the whole resource boot.
pub const BEFORE_INIT: &str = "runner.before_init";
/// Emitted after every resource initialized.
pub const AFTER_INIT: &str = "runner.after_init";
/// Before each resource's init chain.
pub const RESOURCES_BEFORE_INIT: &str = "runner.resources.before_init";
/// After each resource's init chain resolved.
pub const RESOURCES_AFTER_INIT: &str = "runner.resources.after_init";
/// A resource's init chain rejected; suppressible.
pub const RESOURCES_ON_ERROR: &str = "runner.resources.on_error";
/// Before every task execution.
pub const TASKS_BEFORE_RUN: &str = "runner.tasks.before_run";
/// After every successful task execution; output is rewritable.
pub const TASKS_AFTER_RUN: &str = "runner.tasks.after_run";
/// A task failed; suppressible.
pub const TASKS_ON_ERROR: &str = "runner.tasks.on_error";
/// Failures nothing else owns: disposer errors, signal-handler errors.
pub const UNHANDLED_ERROR: &str = "runner.unhandled_error";

/// The built-in lifecycle event definitions.
pub(crate) fn events() -> Vec<RegistrableItem> {
    vec![
        event(READY).build().into(),
        event(BEFORE_INIT).build().into(),
        event(AFTER_INIT).build().into(),
        event(RESOURCES_BEFORE_INIT).build().into(),
        event(RESOURCES_AFTER_INIT).build().into(),
        event(RESOURCES_ON_ERROR).build().into(),
        event(TASKS_BEFORE_RUN).build().into(),
        event(TASKS_AFTER_RUN).build().into(),
        event(TASKS_ON_ERROR).build().into(),
        event(UNHANDLED_ERROR).build().into(),
    ]
}

/// Per-task lifecycle event ids, derived from the task id.
#[must_use]
pub fn task_before_run_id(task_id: &ItemId) -> ItemId {
    ItemId::new(format!("{task_id}.before_run"))
}

/// See [`task_before_run_id`].
#[must_use]
pub fn task_after_run_id(task_id: &ItemId) -> ItemId {
    ItemId::new(format!("{task_id}.after_run"))
}

/// See [`task_before_run_id`].
#[must_use]
pub fn task_on_error_id(task_id: &ItemId) -> ItemId {
    ItemId::new(format!("{task_id}.on_error"))
}

/// Shared flag letting an `on_error` listener swallow the failure.
#[derive(Debug, Clone, Default)]
pub struct SuppressFlag {
    flag: Arc<AtomicBool>,
}

impl SuppressFlag {
    /// New unsuppressed flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Swallow the error: the failing operation resolves as if successful.
    pub fn suppress(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether any listener suppressed.
    #[must_use]
    pub fn is_suppressed(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Shared handle letting `after_run` listeners replace a task's output.
#[derive(Debug, Clone)]
pub struct OutputHandle {
    value: Arc<Mutex<Value>>,
}

impl OutputHandle {
    /// Handle seeded with the task's raw output.
    #[must_use]
    pub fn new(initial: Value) -> Self {
        Self { value: Arc::new(Mutex::new(initial)) }
    }

    /// Replace the output.
    pub fn set(&self, value: Value) {
        *self.value.lock() = value;
    }

    /// The current output.
    #[must_use]
    pub fn get(&self) -> Value {
        self.value.lock().clone()
    }
}

/// Payload of [`TASKS_BEFORE_RUN`] and each per-task `*.before_run`.
#[derive(Debug, Clone)]
pub struct TaskBeforeRun {
    /// The task about to run.
    pub task_id: ItemId,
    /// Its validated input.
    pub input: Value,
}

/// Payload of [`TASKS_AFTER_RUN`] and each per-task `*.after_run`.
#[derive(Debug, Clone)]
pub struct TaskAfterRun {
    /// The task that ran.
    pub task_id: ItemId,
    /// The input it ran with.
    pub input: Value,
    /// The output; listeners may rewrite it.
    pub output: OutputHandle,
}

/// Payload of [`TASKS_ON_ERROR`] and each per-task `*.on_error`.
#[derive(Debug, Clone)]
pub struct TaskOnError {
    /// The task that failed.
    pub task_id: ItemId,
    /// Its error.
    pub error: RunnerError,
    /// Suppressing resolves the task with `null`.
    pub suppress: SuppressFlag,
}

/// Payload of [`RESOURCES_BEFORE_INIT`].
#[derive(Debug, Clone)]
pub struct ResourceBeforeInit {
    /// The resource about to initialize.
    pub resource_id: ItemId,
    /// Its merged config.
    pub config: Value,
}

/// Payload of [`RESOURCES_AFTER_INIT`].
#[derive(Debug, Clone)]
pub struct ResourceAfterInit {
    /// The resource that initialized.
    pub resource_id: ItemId,
}

/// Payload of [`RESOURCES_ON_ERROR`].
#[derive(Debug, Clone)]
pub struct ResourceOnError {
    /// The resource whose init failed.
    pub resource_id: ItemId,
    /// Its error.
    pub error: RunnerError,
    /// Suppressing treats init as successful with no value.
    pub suppress: SuppressFlag,
}

/// Payload of [`UNHANDLED_ERROR`].
#[derive(Debug, Clone)]
pub struct UnhandledError {
    /// What produced the error.
    pub source: ItemId,
    /// The error.
    pub error: RunnerError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn suppress_flag_is_shared() {
        let flag = SuppressFlag::new();
        let clone = flag.clone();
        clone.suppress();
        assert!(flag.is_suppressed());
    }

    #[test]
    fn output_handle_rewrites() {
        let handle = OutputHandle::new(json!(1));
        handle.set(json!(2));
        assert_eq!(handle.get(), json!(2));
    }

    #[test]
    fn per_task_ids_derive_from_task_id() {
        let id = ItemId::new("app.work");
        assert_eq!(task_before_run_id(&id).as_str(), "app.work.before_run");
        assert_eq!(task_after_run_id(&id).as_str(), "app.work.after_run");
        assert_eq!(task_on_error_id(&id).as_str(), "app.work.on_error");
    }
}
