//! Fallback middleware: a handler closure runs when the chain fails.
//!
//! Unlike the data-configured built-ins, a fallback carries code, so each
//! one is defined (and registered) by the application with its own id.

use std::future::Future;

use runner_error::{RunnerError, RunnerResult};
use serde_json::Value;

use crate::definitions::{task_middleware, ItemId, TaskMiddlewareDefinition};

/// Define a fallback middleware: when the inner chain rejects, `handler`
/// receives the error and the original input and produces the output.
#[must_use]
pub fn fallback<F, Fut>(id: impl Into<ItemId>, handler: F) -> TaskMiddlewareDefinition
where
    F: Fn(RunnerError, Value) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = RunnerResult<Value>> + Send + 'static,
{
    task_middleware(id)
        .run(move |call, _deps, _config| {
            let handler = handler.clone();
            async move {
                let input = call.input.clone();
                match call.next(input.clone()).await {
                    Ok(output) => Ok(output),
                    Err(error) => handler(error, input).await,
                }
            }
        })
        .build()
}
