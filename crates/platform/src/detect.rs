//! Host detection and the runtime mode protocol.

use std::fmt;
use std::sync::Arc;

use runner_log::debug;

use crate::{NoopPlatform, Platform, TokioPlatform};

/// Runtime mode resolved from `RUNNER_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvMode {
    /// Development (the default when `RUNNER_ENV` is unset).
    #[default]
    Dev,
    /// Test runs.
    Test,
    /// Production.
    Prod,
}

impl EnvMode {
    /// Resolve the mode from the given platform's environment.
    #[must_use]
    pub fn from_platform(platform: &dyn Platform) -> Self {
        match platform.env("RUNNER_ENV").as_deref() {
            Some("prod" | "production") => EnvMode::Prod,
            Some("test") => EnvMode::Test,
            _ => EnvMode::Dev,
        }
    }
}

impl fmt::Display for EnvMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvMode::Dev => write!(f, "dev"),
            EnvMode::Test => write!(f, "test"),
            EnvMode::Prod => write!(f, "prod"),
        }
    }
}

/// Pick a platform for the current host.
///
/// Defaults to the tokio platform; `RUNNER_PLATFORM=noop` forces the
/// embedding platform for hosts that own the process themselves. Callers
/// wanting full control pass their own platform to `run()` instead.
#[must_use]
pub fn detect() -> Arc<dyn Platform> {
    let platform: Arc<dyn Platform> = match std::env::var("RUNNER_PLATFORM").as_deref() {
        Ok("noop") => Arc::new(NoopPlatform::new()),
        _ => Arc::new(TokioPlatform::new()),
    };
    debug!(platform = platform.name(), "platform detected");
    platform
}
