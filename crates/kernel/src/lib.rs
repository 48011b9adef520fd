//! # Runner
//!
//! A declarative dependency-injection and orchestration runtime.
//!
//! Applications are assembled from five kinds of frozen descriptors —
//! tasks, resources, events, hooks and middleware — registered under a
//! root resource. [`run`] resolves the dependency graph, initializes
//! resources leaves-first, composes middleware chains, locks the
//! registry, and returns a disposable [`RunResult`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runner::prelude::*;
//! use serde_json::{json, Value};
//!
//! #[tokio::main]
//! async fn main() -> runner_error::RunnerResult<()> {
//!     let greet = task("app.greet")
//!         .run(|input: Value, _deps| async move {
//!             let name = input["name"].as_str().unwrap_or("world");
//!             Ok(json!(format!("hello, {name}")))
//!         })
//!         .build();
//!
//!     let app = resource("app").register([greet.clone().into()]).build();
//!
//!     let runtime = run(app, RunOptions::default()).await?;
//!     let out = runtime.run_task(&greet, json!({"name": "runner"})).await?;
//!     assert_eq!(out, json!("hello, runner"));
//!     runtime.dispose().await
//! }
//! ```
//!
//! The crate splits along the boot pipeline: [`definitions`] (the
//! descriptor surface), [`store`] (the registry), the resolver, the
//! event manager, the resource initializer, the task runner, and the
//! built-in middleware in [`builtins`].

pub mod builtins;
pub mod definitions;
mod dependencies;
mod events;
mod graph;
mod init;
pub mod lifecycle;
mod runtime;
mod store;
mod tasks;

pub use definitions::{
    event, hook, phantom_task, resource, resource_middleware, tag, task, task_middleware,
    AnyValue, ConfiguredResource, DependencyRef, EventDefinition, HookDefinition, HookTarget,
    ItemId, ItemKind, MiddlewareScope, RegistrableItem, ResourceDefinition,
    ResourceMiddlewareAttachment, ResourceMiddlewareCall, ResourceMiddlewareDefinition, Schema,
    TagDefinition, TagRef, TaskDefinition, TaskMiddlewareAttachment, TaskMiddlewareCall,
    TaskMiddlewareDefinition,
};
pub use dependencies::Dependencies;
pub use events::{
    EmissionInterceptorFn, EmitOptions, EmitReport, Emission, EventData, EventManager,
    HookInterceptorFn, ListenerError, ListenerEntry, ListenerFilter, ListenerFn, NextEmit,
    NextHookCall,
};
pub use graph::{detect_event_cycles, resolve, MissingDependency, Resolution};
pub use runtime::{run, DebugMode, IdRef, RunOptions, RunResult};
pub use store::{
    HookRecord, ResourceMiddlewareRecord, ResourceRecord, ResourceState, Store,
    TaskMiddlewareRecord, TaskRecord,
};
pub use tasks::TaskRunner;

// The supporting crates, re-exported so applications depend on one name.
pub use runner_error as error;
pub use runner_log as log;
pub use runner_platform as platform;
pub use runner_resilience as resilience;

/// The commonly-used surface in one import.
pub mod prelude {
    pub use crate::builtins::{self, fallback, TunnelService};
    pub use crate::definitions::{
        event, hook, phantom_task, resource, resource_middleware, tag, task, task_middleware,
        DependencyRef, ItemId, Schema,
    };
    pub use crate::{
        run, DebugMode, Dependencies, EmitOptions, RunOptions, RunResult,
    };
    pub use runner_error::{RunnerError, RunnerResult};
}
