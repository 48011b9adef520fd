//! Middleware asserting an application context is bound for the call.

use runner_error::RunnerError;

use crate::definitions::{task_middleware, TaskMiddlewareDefinition};

/// Middleware id.
pub const REQUIRE_CONTEXT: &str = "runner.middleware.require_context";

pub(crate) fn definition() -> TaskMiddlewareDefinition {
    task_middleware(REQUIRE_CONTEXT)
        .run(|call, deps, _config| async move {
            match deps.context_raw()? {
                Some(_) => call.next(call.input.clone()).await,
                None => Err(RunnerError::validation(
                    "Context",
                    call.task.id.as_str(),
                    "no application context is bound for this call",
                )),
            }
        })
        .build()
}
