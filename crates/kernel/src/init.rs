//! Resource initialization and disposal.

use std::collections::HashSet;
use std::sync::Arc;

use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

use crate::definitions::{AnyValue, ItemId, ResourceMiddlewareCall};
use crate::dependencies::Dependencies;
use crate::events::{EmitOptions, EventData};
use crate::lifecycle::{
    self, ResourceAfterInit, ResourceBeforeInit, ResourceOnError, SuppressFlag, UnhandledError,
};
use crate::runtime::RuntimeServices;
use crate::store::{ResourceRecord, ResourceState};

type InitChain = Arc<
    dyn Fn(Value) -> futures::future::BoxFuture<'static, RunnerResult<AnyValue>> + Send + Sync,
>;

/// Initialize every resource in `order` (leaves first).
///
/// On failure the already-initialized prefix is disposed in reverse order
/// before the error surfaces. Returns the ids actually initialized, in
/// order, for later disposal.
pub(crate) async fn initialize_resources(
    services: &Arc<RuntimeServices>,
    order: &[ItemId],
) -> RunnerResult<Vec<ItemId>> {
    let mut initialized: Vec<ItemId> = Vec::with_capacity(order.len());

    for id in order {
        match initialize_one(services, id).await {
            Ok(()) => initialized.push(id.clone()),
            Err(error) => {
                services
                    .logger
                    .with_source(id.to_string())
                    .error(format!("resource init failed, unwinding boot: {error}"));
                // The failing resource may have initialized before a
                // lifecycle emission rejected; unwind it too.
                let mut unwind = initialized;
                if services.store.resource(id).is_ok_and(|r| r.is_initialized()) {
                    unwind.push(id.clone());
                }
                dispose_resources(services, &unwind).await;
                return Err(error);
            }
        }
    }
    Ok(initialized)
}

async fn initialize_one(services: &Arc<RuntimeServices>, id: &ItemId) -> RunnerResult<()> {
    let record = services.store.resource(id)?;
    let definition = Arc::clone(&record.definition);
    let config = record.config();

    if let Some(schema) = &definition.config_schema {
        schema
            .check(&config)
            .map_err(|cause| RunnerError::validation("Resource config", id.as_str(), cause))?;
    }

    record.set_state(ResourceState::Initializing);
    services.logger.with_source(id.to_string()).debug("initializing resource");

    let before = Arc::new(ResourceBeforeInit { resource_id: id.clone(), config: config.clone() });
    services
        .events
        .emit_lifecycle(
            &ItemId::new(lifecycle::RESOURCES_BEFORE_INIT),
            EventData::Opaque(before),
            id.clone(),
            EmitOptions::default(),
        )
        .await?;

    let chain = compose_init_chain(services, &record)?;
    match chain(config).await {
        Ok(value) => {
            if let Some(schema) = &definition.result_schema {
                if let Some(json) = value.downcast_ref::<Value>() {
                    schema.check(json).map_err(|cause| {
                        RunnerError::validation("Resource value", id.as_str(), cause)
                    })?;
                }
            }
            let _ = record.value.set(Some(value));
            record.set_state(ResourceState::Initialized);
            emit_after_init(services, id).await?;
            Ok(())
        }
        Err(error) => {
            let suppress = SuppressFlag::new();
            let payload = Arc::new(ResourceOnError {
                resource_id: id.clone(),
                error: error.clone(),
                suppress: suppress.clone(),
            });
            let options = EmitOptions::reported();
            let outcome = services
                .events
                .emit_lifecycle(
                    &ItemId::new(lifecycle::RESOURCES_ON_ERROR),
                    EventData::Opaque(payload),
                    id.clone(),
                    options,
                )
                .await;
            if let Ok(Some(report)) = outcome {
                for failure in report.errors {
                    services.logger.with_source(failure.listener_id.to_string()).error(format!(
                        "resources.on_error listener failed: {}",
                        failure.error
                    ));
                }
            }

            if suppress.is_suppressed() {
                // Proceed as if successful, with no value.
                let _ = record.value.set(None);
                record.set_state(ResourceState::Initialized);
                emit_after_init(services, id).await?;
                Ok(())
            } else {
                record.set_state(ResourceState::Registered);
                Err(error)
            }
        }
    }
}

async fn emit_after_init(services: &Arc<RuntimeServices>, id: &ItemId) -> RunnerResult<()> {
    let payload = Arc::new(ResourceAfterInit { resource_id: id.clone() });
    services
        .events
        .emit_lifecycle(
            &ItemId::new(lifecycle::RESOURCES_AFTER_INIT),
            EventData::Opaque(payload),
            id.clone(),
            EmitOptions::default(),
        )
        .await?;
    Ok(())
}

/// Wrap a resource's init with its applicable middleware: attached layers
/// innermost-adjacent, applicable globals outermost, deduplicated by id
/// with attachments taking precedence.
fn compose_init_chain(
    services: &Arc<RuntimeServices>,
    record: &Arc<ResourceRecord>,
) -> RunnerResult<InitChain> {
    let definition = Arc::clone(&record.definition);
    let deps = record.dependencies().ok_or_else(|| {
        RunnerError::internal(format!("resource {} has no resolved deps", definition.id))
    })?;

    let base: InitChain = {
        let definition = Arc::clone(&definition);
        Arc::new(move |config: Value| {
            let definition = Arc::clone(&definition);
            let deps = deps.clone();
            Box::pin(async move {
                match definition.init_fn() {
                    Some(init) => init(config, deps).await,
                    // A pure container: its value is JSON null.
                    None => Ok(Arc::new(Value::Null) as AnyValue),
                }
            })
        })
    };

    let attached_ids: HashSet<ItemId> =
        definition.middleware.iter().map(|a| a.definition.id.clone()).collect();

    struct Layer {
        definition: Arc<crate::definitions::ResourceMiddlewareDefinition>,
        config: Value,
        deps: Dependencies,
    }
    let mut layers: Vec<Layer> = Vec::new();

    for mw_record in services.store.all_resource_middleware() {
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
        let mw_record = services.store.resource_middleware(&attachment.definition.id)?;
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

    let mut next = base;
    for layer in layers.into_iter().rev() {
        let inner = next;
        let run = layer.definition.run_fn();
        let resource_definition = Arc::clone(&definition);
        let config = layer.config;
        let mw_deps = layer.deps;
        next = Arc::new(move |resource_config: Value| {
            let call = ResourceMiddlewareCall::new(
                Arc::clone(&resource_definition),
                resource_config.clone(),
                inner.clone(),
            );
            run(call, mw_deps.clone(), config.clone())
        });
    }
    Ok(next)
}

/// Dispose `initialized` resources in reverse order, exactly once each.
///
/// Disposer failures are logged and surfaced through the unhandled-error
/// event; they never stop the remaining disposers.
pub(crate) async fn dispose_resources(services: &Arc<RuntimeServices>, initialized: &[ItemId]) {
    for id in initialized.iter().rev() {
        let Ok(record) = services.store.resource(id) else { continue };
        if !record.is_initialized() || !record.begin_dispose() {
            continue;
        }

        let Some(dispose) = record.definition.dispose_fn() else {
            record.set_state(ResourceState::Disposed);
            continue;
        };
        let deps = record.dependencies().unwrap_or_else(|| {
            Dependencies::empty(id.clone(), Arc::downgrade(services))
        });

        record.set_state(ResourceState::Disposing);
        let value = record.value().unwrap_or_else(|| Arc::new(Value::Null) as AnyValue);
        if let Err(error) = dispose(value, record.config(), deps).await {
            services
                .logger
                .with_source(id.to_string())
                .error(format!("resource dispose failed: {error}"));
            let payload =
                Arc::new(UnhandledError { source: id.clone(), error });
            let options = EmitOptions::reported();
            let _ = services
                .events
                .emit_lifecycle(
                    &ItemId::new(lifecycle::UNHANDLED_ERROR),
                    EventData::Opaque(payload),
                    id.clone(),
                    options,
                )
                .await;
        }
        record.set_state(ResourceState::Disposed);
    }
}
