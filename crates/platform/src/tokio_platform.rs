//! The full-process platform on top of the tokio runtime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use runner_error::RunnerResult;
use runner_log::debug;

use crate::platform::{PanicHandler, PanicInfoSnapshot, Platform, ShutdownHandler, SignalBinding};
use crate::ContextStorage;

/// Environment variable that forces the unsupported context-storage stub
/// while the rest of the platform stays live. Used to exercise the
/// degraded code paths in tests.
pub const FORCE_NOOP_ALS: &str = "RUNNER_FORCE_NOOP_ALS";

// The process panic hook is global; platforms share one chained hook and a
// handler registry so bindings can detach without disturbing each other.
static PANIC_HANDLERS: Mutex<Vec<(u64, PanicHandler)>> = Mutex::new(Vec::new());
static NEXT_PANIC_ID: AtomicU64 = AtomicU64::new(1);
static PANIC_HOOK: OnceCell<()> = OnceCell::new();

fn install_panic_hook() {
    PANIC_HOOK.get_or_init(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let snapshot = PanicInfoSnapshot {
                message: info
                    .payload()
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| info.payload().downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic with non-string payload".to_string()),
                location: info.location().map(|l| format!("{}:{}", l.file(), l.line())),
            };
            let handlers: Vec<PanicHandler> =
                PANIC_HANDLERS.lock().iter().map(|(_, h)| Arc::clone(h)).collect();
            for handler in handlers {
                handler(&snapshot);
            }
            previous(info);
        }));
    });
}

/// Platform for a real OS process running on tokio.
#[derive(Debug, Default)]
pub struct TokioPlatform {
    _private: (),
}

impl TokioPlatform {
    /// New tokio-backed platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Platform for TokioPlatform {
    async fn init(&self) -> RunnerResult<()> {
        debug!(platform = self.name(), "platform initialized");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "tokio"
    }

    fn on_shutdown_signal(&self, handler: ShutdownHandler) -> RunnerResult<SignalBinding> {
        let handle = tokio::spawn(async move {
            shutdown_signal().await;
            handler();
        });
        Ok(SignalBinding::new(move || handle.abort()))
    }

    fn on_panic(&self, handler: PanicHandler) -> RunnerResult<SignalBinding> {
        install_panic_hook();
        let id = NEXT_PANIC_ID.fetch_add(1, Ordering::Relaxed);
        PANIC_HANDLERS.lock().push((id, handler));
        Ok(SignalBinding::new(move || {
            PANIC_HANDLERS.lock().retain(|(hid, _)| *hid != id);
        }))
    }

    fn exit(&self, code: i32) -> RunnerResult<()> {
        std::process::exit(code)
    }

    fn env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }

    fn has_context_storage(&self) -> bool {
        self.env(FORCE_NOOP_ALS).is_none()
    }

    fn context_storage(&self) -> ContextStorage {
        if self.has_context_storage() {
            ContextStorage::new()
        } else {
            ContextStorage::unsupported()
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
