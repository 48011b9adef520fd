//! Task execution: cached middleware composition, schema validation,
//! lifecycle emissions with suppress support.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

use crate::definitions::{ItemId, TaskDefinition, TaskMiddlewareCall};
use crate::dependencies::Dependencies;
use crate::events::{EmitOptions, EventData};
use crate::lifecycle::{
    self, OutputHandle, SuppressFlag, TaskAfterRun, TaskBeforeRun, TaskOnError,
};
use crate::runtime::RuntimeServices;
use crate::store::{ComposedTaskFn, TaskRecord};

/// Runs tasks through their composed middleware chains.
pub struct TaskRunner {
    services: Weak<RuntimeServices>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner").finish_non_exhaustive()
    }
}

impl TaskRunner {
    pub(crate) fn new(services: Weak<RuntimeServices>) -> Self {
        Self { services }
    }

    fn services(&self) -> RunnerResult<Arc<RuntimeServices>> {
        self.services.upgrade().ok_or_else(|| RunnerError::disposed("Runtime"))
    }

    /// Compose and cache the chain of every registered task. Called once
    /// at lock time.
    pub(crate) fn compose_all(&self) -> RunnerResult<()> {
        let services = self.services()?;
        for record in services.store.all_tasks() {
            let composed = compose_chain(&services, &record)?;
            let _ = record.composed.set(composed);
        }
        Ok(())
    }

    /// Execute a task by id.
    pub async fn execute(&self, task_id: &ItemId, input: Value) -> RunnerResult<Value> {
        let services = self.services()?;
        if services.is_disposed() {
            return Err(RunnerError::disposed("Runtime"));
        }
        let record = services.store.task(task_id)?;
        let definition = Arc::clone(&record.definition);

        validate_input(&definition, &input)?;

        let composed = record.composed().ok_or_else(|| {
            RunnerError::internal(format!("task {task_id} has no composed chain (not locked yet)"))
        })?;

        // A task running as part of a lifecycle dispatch must not emit
        // further lifecycle events.
        let in_lifecycle = services.events.in_lifecycle_dispatch();

        if !in_lifecycle {
            let payload = Arc::new(TaskBeforeRun { task_id: task_id.clone(), input: input.clone() });
            emit_lifecycle_pair(
                &services,
                &lifecycle::task_before_run_id(task_id),
                lifecycle::TASKS_BEFORE_RUN,
                payload,
                task_id,
            )
            .await?;
        }

        match composed(input.clone()).await {
            Ok(output) => {
                validate_result(&definition, &output)?;
                let mut final_output = output;
                if !in_lifecycle {
                    let handle = OutputHandle::new(final_output);
                    let payload = Arc::new(TaskAfterRun {
                        task_id: task_id.clone(),
                        input,
                        output: handle.clone(),
                    });
                    emit_lifecycle_pair(
                        &services,
                        &lifecycle::task_after_run_id(task_id),
                        lifecycle::TASKS_AFTER_RUN,
                        payload,
                        task_id,
                    )
                    .await?;
                    final_output = handle.get();
                    // Listeners may have replaced the output; hold it to
                    // the same contract.
                    validate_result(&definition, &final_output)?;
                }
                Ok(final_output)
            }
            Err(error) => {
                if in_lifecycle {
                    return Err(error);
                }
                let suppress = SuppressFlag::new();
                let payload = Arc::new(TaskOnError {
                    task_id: task_id.clone(),
                    error: error.clone(),
                    suppress: suppress.clone(),
                });
                // Error listeners must not mask the original failure;
                // their own failures are logged instead.
                report_lifecycle_pair(
                    &services,
                    &lifecycle::task_on_error_id(task_id),
                    lifecycle::TASKS_ON_ERROR,
                    payload,
                    task_id,
                )
                .await;

                if suppress.is_suppressed() {
                    Ok(Value::Null)
                } else {
                    Err(error)
                }
            }
        }
    }
}

/// Emit the per-task event then the global one, propagating failures.
async fn emit_lifecycle_pair(
    services: &Arc<RuntimeServices>,
    task_event: &ItemId,
    global_event: &str,
    payload: Arc<dyn std::any::Any + Send + Sync>,
    source: &ItemId,
) -> RunnerResult<()> {
    services
        .events
        .emit_lifecycle(
            task_event,
            EventData::Opaque(Arc::clone(&payload)),
            source.clone(),
            EmitOptions::default(),
        )
        .await?;
    services
        .events
        .emit_lifecycle(
            &ItemId::new(global_event),
            EventData::Opaque(payload),
            source.clone(),
            EmitOptions::default(),
        )
        .await?;
    Ok(())
}

/// Emit the per-task event then the global one, logging listener failures.
async fn report_lifecycle_pair(
    services: &Arc<RuntimeServices>,
    task_event: &ItemId,
    global_event: &str,
    payload: Arc<dyn std::any::Any + Send + Sync>,
    source: &ItemId,
) {
    let options = EmitOptions::reported();
    for event in [task_event.clone(), ItemId::new(global_event)] {
        let result = services
            .events
            .emit_lifecycle(&event, EventData::Opaque(Arc::clone(&payload)), source.clone(), options)
            .await;
        match result {
            Ok(Some(report)) => {
                for failure in report.errors {
                    services.logger.with_source(failure.listener_id.to_string()).error(format!(
                        "error listener failed during {event}: {}",
                        failure.error
                    ));
                }
            }
            Ok(None) => {}
            Err(error) => {
                services
                    .logger
                    .with_source(source.to_string())
                    .error(format!("lifecycle emission {event} failed: {error}"));
            }
        }
    }
}

fn validate_input(definition: &TaskDefinition, input: &Value) -> RunnerResult<()> {
    if let Some(schema) = &definition.input_schema {
        schema
            .check(input)
            .map_err(|cause| RunnerError::validation("Task input", definition.id.as_str(), cause))?;
    }
    for tag in &definition.tags {
        if let Some(schema) = &tag.definition.input_schema {
            schema.check(input).map_err(|cause| {
                RunnerError::validation(
                    "Task input",
                    definition.id.as_str(),
                    format!("tag {}: {cause}", tag.id()),
                )
            })?;
        }
    }
    Ok(())
}

fn validate_result(definition: &TaskDefinition, output: &Value) -> RunnerResult<()> {
    if let Some(schema) = &definition.result_schema {
        schema.check(output).map_err(|cause| {
            RunnerError::validation("Task result", definition.id.as_str(), cause)
        })?;
    }
    for tag in &definition.tags {
        if let Some(schema) = &tag.definition.result_schema {
            schema.check(output).map_err(|cause| {
                RunnerError::validation(
                    "Task result",
                    definition.id.as_str(),
                    format!("tag {}: {cause}", tag.id()),
                )
            })?;
        }
    }
    Ok(())
}

/// Build the onion for one task: base runner innermost, attached
/// middleware around it, applicable globals outermost (unless already
/// attached, in which case the attachment wins).
fn compose_chain(
    services: &Arc<RuntimeServices>,
    record: &Arc<TaskRecord>,
) -> RunnerResult<ComposedTaskFn> {
    let definition = Arc::clone(&record.definition);
    let deps = record
        .dependencies()
        .ok_or_else(|| RunnerError::internal(format!("task {} has no resolved deps", definition.id)))?;

    let base = base_runner(services, &definition, deps);

    // Outermost-first list: globals that apply but are not attached, then
    // the attachments in declaration order.
    let attached_ids: HashSet<ItemId> =
        definition.middleware.iter().map(|a| a.definition.id.clone()).collect();

    struct Layer {
        definition: Arc<crate::definitions::TaskMiddlewareDefinition>,
        config: Value,
        deps: Dependencies,
    }
    let mut layers: Vec<Layer> = Vec::new();

    for mw_record in services.store.all_task_middleware() {
        if attached_ids.contains(&mw_record.definition.id) {
            continue;
        }
        if mw_record.definition.scope.applies_to(&definition) {
            layers.push(Layer {
                definition: Arc::clone(&mw_record.definition),
                config: Value::Null,
                deps: mw_record.dependencies().ok_or_else(|| {
                    RunnerError::internal(format!(
                        "middleware {} has no resolved deps",
                        mw_record.definition.id
                    ))
                })?,
            });
        }
    }

    let mut seen: HashSet<ItemId> = layers.iter().map(|l| l.definition.id.clone()).collect();
    for attachment in &definition.middleware {
        if !seen.insert(attachment.definition.id.clone()) {
            continue;
        }
        let mw_record = services.store.task_middleware(&attachment.definition.id)?;
        if let Some(schema) = &mw_record.definition.config_schema {
            schema.check(&attachment.config).map_err(|cause| {
                RunnerError::validation(
                    "Middleware config",
                    mw_record.definition.id.as_str(),
                    cause,
                )
            })?;
        }
        layers.push(Layer {
            definition: Arc::clone(&mw_record.definition),
            config: attachment.config.clone(),
            deps: mw_record.dependencies().ok_or_else(|| {
                RunnerError::internal(format!(
                    "middleware {} has no resolved deps",
                    mw_record.definition.id
                ))
            })?,
        });
    }

    // Wrap inside-out: the last layer in the list sits closest to the
    // base runner.
    let mut next = base;
    for layer in layers.into_iter().rev() {
        let inner = next;
        let run = layer.definition.run_fn();
        let task_definition = Arc::clone(&definition);
        let config = layer.config;
        let mw_deps = layer.deps;
        next = Arc::new(move |input: Value| {
            let call =
                TaskMiddlewareCall::new(Arc::clone(&task_definition), input.clone(), inner.clone());
            run(call, mw_deps.clone(), config.clone())
        });
    }
    Ok(next)
}

/// The innermost runner: tunnel route, local body, or phantom error.
fn base_runner(
    services: &Arc<RuntimeServices>,
    definition: &Arc<TaskDefinition>,
    deps: Dependencies,
) -> ComposedTaskFn {
    let weak = Arc::downgrade(services);
    let definition = Arc::clone(definition);
    Arc::new(move |input: Value| {
        let weak = weak.clone();
        let definition = Arc::clone(&definition);
        let deps = deps.clone();
        Box::pin(async move {
            if let Some(services) = weak.upgrade() {
                let route = services.tunnels.get(&definition.id).map(|r| r.run.clone());
                if let Some(run) = route {
                    return run(definition.id.clone(), input).await;
                }
            }
            match definition.run_fn() {
                Some(run) => run(input, deps).await,
                None => Err(RunnerError::PhantomTaskNotRouted {
                    task_id: definition.id.to_string(),
                }),
            }
        })
    })
}
