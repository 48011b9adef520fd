//! Frozen descriptors: everything user code defines.
//!
//! Definers (`task`, `resource`, `event`, `hook`, `task_middleware`,
//! `resource_middleware`, `tag`) return fluent builders; `build()` freezes
//! the descriptor. Descriptors are immutable and cheap to clone; the store
//! records built from them are the only mutable shadow.

mod dependency;
mod event;
mod hook;
mod id;
mod middleware;
mod registrable;
mod resource;
mod schema;
mod tag;
mod task;

use std::any::Any;
use std::sync::Arc;

pub use dependency::DependencyRef;
pub use event::{event, EventBuilder, EventDefinition};
pub use hook::{hook, HookBuilder, HookDefinition, HookFn, HookTarget};
pub use id::{ItemId, ItemKind};
pub use middleware::{
    resource_middleware, task_middleware, MiddlewareScope, ResourceInitFuture,
    ResourceMiddlewareAttachment, ResourceMiddlewareBuilder, ResourceMiddlewareCall,
    ResourceMiddlewareDefinition, ResourceMiddlewareFn, TaskMiddlewareAttachment,
    TaskMiddlewareBuilder, TaskMiddlewareCall, TaskMiddlewareDefinition, TaskMiddlewareFn,
};
pub use registrable::RegistrableItem;
pub use resource::{
    resource, ConfigMergerFn, ConfiguredResource, ResourceBuilder, ResourceDefinition,
    ResourceDisposeFn, ResourceInitFn,
};
pub use schema::Schema;
pub use tag::{tag, TagBuilder, TagDefinition, TagRef};
pub use task::{phantom_task, task, TaskBuilder, TaskDefinition, TaskFn, TaskFuture};

/// Type-erased resource value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;
