//! Test double with injected env and manually triggerable signals.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use runner_error::RunnerResult;

use crate::platform::{PanicHandler, PanicInfoSnapshot, Platform, ShutdownHandler, SignalBinding};
use crate::ContextStorage;

#[derive(Default)]
struct TestState {
    env: HashMap<String, String>,
    exits: Vec<i32>,
    shutdown_handlers: Vec<(u64, ShutdownHandler)>,
    panic_handlers: Vec<(u64, PanicHandler)>,
}

/// In-memory platform for tests: no OS interaction, everything observable.
#[derive(Clone, Default)]
pub struct TestPlatform {
    state: Arc<Mutex<TestState>>,
    next_id: Arc<AtomicU64>,
}

impl TestPlatform {
    /// New platform with an empty environment.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject an environment variable.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state.lock().env.insert(key.into(), value.into());
    }

    /// Exit codes recorded by [`Platform::exit`].
    #[must_use]
    pub fn exits(&self) -> Vec<i32> {
        self.state.lock().exits.clone()
    }

    /// Number of currently attached shutdown handlers.
    #[must_use]
    pub fn shutdown_handler_count(&self) -> usize {
        self.state.lock().shutdown_handlers.len()
    }

    /// Fire every attached shutdown handler, as the OS signal would.
    pub fn trigger_shutdown(&self) {
        let handlers: Vec<ShutdownHandler> =
            self.state.lock().shutdown_handlers.iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler();
        }
    }

    /// Fire every attached panic handler with a synthetic snapshot.
    pub fn trigger_panic(&self, message: impl Into<String>) {
        let snapshot = PanicInfoSnapshot { message: message.into(), location: None };
        let handlers: Vec<PanicHandler> =
            self.state.lock().panic_handlers.iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(&snapshot);
        }
    }
}

impl std::fmt::Debug for TestPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TestPlatform")
            .field("env_keys", &state.env.len())
            .field("exits", &state.exits)
            .field("shutdown_handlers", &state.shutdown_handlers.len())
            .finish()
    }
}

#[async_trait]
impl Platform for TestPlatform {
    async fn init(&self) -> RunnerResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "test"
    }

    fn on_shutdown_signal(&self, handler: ShutdownHandler) -> RunnerResult<SignalBinding> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().shutdown_handlers.push((id, handler));
        let state = Arc::clone(&self.state);
        Ok(SignalBinding::new(move || {
            state.lock().shutdown_handlers.retain(|(hid, _)| *hid != id);
        }))
    }

    fn on_panic(&self, handler: PanicHandler) -> RunnerResult<SignalBinding> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.lock().panic_handlers.push((id, handler));
        let state = Arc::clone(&self.state);
        Ok(SignalBinding::new(move || {
            state.lock().panic_handlers.retain(|(hid, _)| *hid != id);
        }))
    }

    fn exit(&self, code: i32) -> RunnerResult<()> {
        self.state.lock().exits.push(code);
        Ok(())
    }

    fn env(&self, key: &str) -> Option<String> {
        self.state.lock().env.get(key).cloned()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn has_context_storage(&self) -> bool {
        self.env(crate::tokio_platform::FORCE_NOOP_ALS).is_none()
    }

    fn context_storage(&self) -> ContextStorage {
        if self.has_context_storage() {
            ContextStorage::new()
        } else {
            ContextStorage::unsupported()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn injected_env_and_recorded_exits() {
        let platform = TestPlatform::new();
        platform.set_env("RUNNER_ENV", "test");
        assert_eq!(platform.env("RUNNER_ENV").as_deref(), Some("test"));

        platform.exit(3).unwrap();
        assert_eq!(platform.exits(), vec![3]);
    }

    #[tokio::test]
    async fn shutdown_binding_detaches() {
        let platform = TestPlatform::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        let binding = platform
            .on_shutdown_signal(Arc::new(move || {
                fired_clone.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        platform.trigger_shutdown();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        binding.dispose();
        assert_eq!(platform.shutdown_handler_count(), 0);
        platform.trigger_shutdown();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forced_noop_als_degrades_storage_only() {
        let platform = TestPlatform::new();
        platform.set_env(crate::tokio_platform::FORCE_NOOP_ALS, "1");
        assert!(!platform.has_context_storage());
        assert!(platform.context_storage().get::<u32>().unwrap_err().is_platform_unsupported());
        // Everything else stays live.
        assert!(platform.exit(0).is_ok());
    }
}
