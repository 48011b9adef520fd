//! The embedding platform: every host facility is unsupported.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use runner_error::{RunnerError, RunnerResult};

use crate::platform::{PanicHandler, Platform, ShutdownHandler, SignalBinding};
use crate::ContextStorage;

/// Platform for hosts where the embedder owns the process.
///
/// Every operation fails with `PlatformUnsupported`; context storage is
/// the stub that fails at use. `sleep` busy-yields zero time rather than
/// failing — timers are the one facility a misdetected host can safely
/// degrade on.
#[derive(Debug, Default)]
pub struct NoopPlatform {
    _private: (),
}

impl NoopPlatform {
    /// New noop platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Platform for NoopPlatform {
    async fn init(&self) -> RunnerResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop"
    }

    fn on_shutdown_signal(&self, _handler: ShutdownHandler) -> RunnerResult<SignalBinding> {
        Err(RunnerError::platform_unsupported("onShutdownSignal"))
    }

    fn on_panic(&self, _handler: PanicHandler) -> RunnerResult<SignalBinding> {
        Err(RunnerError::platform_unsupported("onPanic"))
    }

    fn exit(&self, _code: i32) -> RunnerResult<()> {
        Err(RunnerError::platform_unsupported("exit"))
    }

    fn env(&self, _key: &str) -> Option<String> {
        None
    }

    fn sleep(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(std::future::ready(()))
    }

    fn has_context_storage(&self) -> bool {
        false
    }

    fn context_storage(&self) -> ContextStorage {
        ContextStorage::unsupported()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn host_facilities_are_unsupported() {
        let platform = NoopPlatform::new();
        assert!(platform.init().await.is_ok());

        let err = platform.on_shutdown_signal(Arc::new(|| {})).unwrap_err();
        assert!(err.is_platform_unsupported());
        assert!(platform.exit(0).unwrap_err().is_platform_unsupported());
        assert!(platform.env("HOME").is_none());
        assert!(!platform.has_context_storage());
        // Storage constructs fine and fails only at use.
        assert!(platform.context_storage().get::<u32>().unwrap_err().is_platform_unsupported());
    }
}
