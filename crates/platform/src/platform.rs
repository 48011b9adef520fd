//! The `Platform` trait and its disposer guards.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use runner_error::RunnerResult;

use crate::ContextStorage;

/// Callback invoked when the host asks the process to shut down.
pub type ShutdownHandler = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked when a panic reaches the process hook.
pub type PanicHandler = Arc<dyn Fn(&PanicInfoSnapshot) + Send + Sync>;

/// What the platform could extract from a panic before it unwound.
#[derive(Debug, Clone)]
pub struct PanicInfoSnapshot {
    /// Rendered panic payload.
    pub message: String,
    /// `file:line` when the payload carried a location.
    pub location: Option<String>,
}

/// Host facilities the kernel is allowed to use.
///
/// Every attachment returns a [`SignalBinding`] so the kernel can detach
/// handlers during disposal; nothing the platform hands out survives the
/// run that requested it.
#[async_trait]
pub trait Platform: Send + Sync + fmt::Debug {
    /// Probe host capabilities. Called once per `run()`.
    async fn init(&self) -> RunnerResult<()>;

    /// Short platform name for logs ("tokio", "noop", "test").
    fn name(&self) -> &'static str;

    /// Invoke `handler` when the host delivers a shutdown signal
    /// (SIGINT/SIGTERM or ctrl-c).
    fn on_shutdown_signal(&self, handler: ShutdownHandler) -> RunnerResult<SignalBinding>;

    /// Invoke `handler` when a panic reaches the process panic hook.
    fn on_panic(&self, handler: PanicHandler) -> RunnerResult<SignalBinding>;

    /// Request process termination.
    fn exit(&self, code: i32) -> RunnerResult<()>;

    /// Read an environment variable from the host (or the injected map).
    fn env(&self, key: &str) -> Option<String>;

    /// Sleep on the host timer.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;

    /// Whether [`Platform::context_storage`] hands out live storage.
    fn has_context_storage(&self) -> bool;

    /// A task-local context slot. On hosts without support this returns a
    /// stub whose accessors fail with `PlatformUnsupported` — construction
    /// itself never fails.
    fn context_storage(&self) -> ContextStorage;
}

type Detach = Box<dyn FnOnce() + Send>;

/// Disposer for a platform handler attachment.
///
/// Detaches on [`dispose`](SignalBinding::dispose) or on drop, whichever
/// comes first; both are idempotent.
pub struct SignalBinding {
    detach: Mutex<Option<Detach>>,
}

impl SignalBinding {
    /// Binding wrapping a detach closure.
    #[must_use]
    pub fn new(detach: impl FnOnce() + Send + 'static) -> Self {
        Self { detach: Mutex::new(Some(Box::new(detach))) }
    }

    /// Binding that detaches nothing (test platforms).
    #[must_use]
    pub fn noop() -> Self {
        Self { detach: Mutex::new(None) }
    }

    /// Detach the handler now.
    pub fn dispose(&self) {
        if let Some(detach) = self.detach.lock().take() {
            detach();
        }
    }
}

impl Drop for SignalBinding {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.get_mut().take() {
            detach();
        }
    }
}

impl fmt::Debug for SignalBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attached = self.detach.lock().is_some();
        f.debug_struct("SignalBinding").field("attached", &attached).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn binding_detaches_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let binding = SignalBinding::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        binding.dispose();
        binding.dispose();
        drop(binding);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn binding_detaches_on_drop() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        drop(SignalBinding::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
