//! Tunnel middleware: route task calls to an external executor.
//!
//! A resource tagged `runner.tags.tunnel` whose value is a
//! [`TunnelService`] claims the tasks it names; the task runner routes
//! those calls through the service instead of the local body. Phantom
//! tasks left unclaimed fail with `PhantomTaskNotRouted` when invoked.

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

use crate::definitions::{
    resource_middleware, ItemId, ResourceMiddlewareDefinition,
};
use crate::runtime::{TunnelRoute, TunnelRunFn};

/// Middleware id.
pub const TUNNEL: &str = "runner.middleware.tunnel";
/// Tag marking tunnel resources.
pub const TUNNEL_TAG: &str = "runner.tags.tunnel";

/// The value a tunnel resource's `init` must produce.
pub struct TunnelService {
    task_ids: Vec<ItemId>,
    run: TunnelRunFn,
}

impl TunnelService {
    /// A service routing `task_ids` through `run`.
    #[must_use]
    pub fn new<F, Fut>(task_ids: Vec<ItemId>, run: F) -> Self
    where
        F: Fn(ItemId, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = RunnerResult<Value>> + Send + 'static,
    {
        Self {
            task_ids,
            run: Arc::new(move |task_id, input| Box::pin(run(task_id, input))),
        }
    }

    /// The tasks this service claims.
    #[must_use]
    pub fn task_ids(&self) -> &[ItemId] {
        &self.task_ids
    }
}

impl std::fmt::Debug for TunnelService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelService").field("task_ids", &self.task_ids).finish()
    }
}

pub(crate) fn definition() -> ResourceMiddlewareDefinition {
    let tunnel_tag = ItemId::new(TUNNEL_TAG);
    resource_middleware(TUNNEL)
        .everywhere_when(move |resource| resource.has_tag(&tunnel_tag))
        .run(|call, deps, _config| async move {
            let owner = call.resource.id.clone();
            let value = call.next(call.config.clone()).await?;

            let Ok(service) = Arc::clone(&value).downcast::<TunnelService>() else {
                return Err(RunnerError::validation(
                    "Tunnel",
                    owner.as_str(),
                    "tunnel resources must produce a TunnelService value",
                ));
            };

            let services = deps.kernel_services()?;
            for task_id in service.task_ids() {
                // The routed task must exist; routing a ghost is a wiring
                // error, not a runtime surprise.
                services.store.task(task_id)?;
                match services.tunnels.entry(task_id.clone()) {
                    Entry::Occupied(existing) => {
                        if existing.get().owner != owner {
                            return Err(RunnerError::validation(
                                "Tunnel",
                                task_id.as_str(),
                                format!(
                                    "task already routed by \"{}\"; one owner per task id",
                                    existing.get().owner
                                ),
                            ));
                        }
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(TunnelRoute {
                            owner: owner.clone(),
                            run: Arc::clone(&service.run),
                        });
                    }
                }
            }
            Ok(value)
        })
        .build()
}
