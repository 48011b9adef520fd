//! The `RunnerError` enum and its classification helpers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Coarse classification of a [`RunnerError`].
///
/// Configuration errors abort boot, validation errors surface schema and
/// contract violations, runtime errors happen while the application is
/// serving work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ErrorKind {
    /// Failures detected while the registration tree is being built or
    /// resolved; these reject the `run()` promise before anything starts.
    Configuration,
    /// Schema or contract violations (input, result, config, payload).
    Validation,
    /// Failures raised while the application is running.
    Runtime,
}

/// Errors produced by the Runner kernel and its supporting crates.
///
/// Variants are never silently suppressed by the kernel; the only sanctioned
/// swallowing path is a lifecycle listener calling `suppress()` on an
/// `on_error` emission.
///
/// With the `serde` feature, errors serialize as variant-tagged objects
/// for log shipping and wire transport; the opaque `Task` source is
/// skipped and deserializes to `None`.
#[derive(Error, Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[non_exhaustive]
pub enum RunnerError {
    /// A second registration tried to claim an already-owned id. The kind
    /// is the kind of the *first* registration seen for the id.
    #[error("{kind} \"{id}\" already registered. Use overrides to replace a registered item.")]
    Duplicate {
        /// Item kind that owns the id ("Task", "Resource", ...).
        kind: String,
        /// The contested identifier.
        id: String,
    },

    /// A value that is not a registrable item reached the store.
    #[error("Unknown item type: {details}")]
    UnknownItemType {
        /// Description of the offending value.
        details: String,
    },

    /// A declared dependency has no matching registration.
    #[error("{key} not found. Did you forget to register it?")]
    DependencyNotFound {
        /// Kind-qualified key, e.g. `Task app.fetch`.
        key: String,
    },

    /// An emission referenced an event id with no registration.
    #[error("Event \"{id}\" not found")]
    EventNotFound {
        /// The unknown event id.
        id: String,
    },

    /// The dependency graph contains at least one cycle. All detected
    /// cycles are listed, each as `a -> b -> ... -> a`.
    #[error("Circular dependencies detected:\n{}", .cycles.join("\n"))]
    CircularDependencies {
        /// Every cycle found, rendered as an arrow-joined path.
        cycles: Vec<String>,
    },

    /// Emitting an event would (or did) require emitting it again through
    /// its own hooks.
    #[error("Event emission cycles detected: {}", .chain.join(" -> "))]
    EventEmissionCycle {
        /// The emission chain that closes the cycle.
        chain: Vec<String>,
    },

    /// A mutation was attempted on a locked component.
    #[error("{what} is locked; no further mutations are accepted")]
    Locked {
        /// What was locked ("Store", "EventManager", ...).
        what: String,
    },

    /// `run()` was invoked on a store that already booted.
    #[error("Store has already been initialized")]
    StoreAlreadyInitialized,

    /// A schema or contract check failed.
    #[error("{subject} validation failed for {id}: {cause}")]
    Validation {
        /// What was validated ("Task input", "Resource config", ...).
        subject: String,
        /// The id of the offending item.
        id: String,
        /// Message from the underlying validator.
        cause: String,
    },

    /// The active platform cannot perform the requested operation.
    #[error("Platform does not support {function}")]
    PlatformUnsupported {
        /// Name of the unsupported function.
        function: String,
    },

    /// A phantom task was invoked without a tunnel claiming it.
    #[error("Phantom task \"{task_id}\" is not routed by any tunnel")]
    PhantomTaskNotRouted {
        /// The unrouted task id.
        task_id: String,
    },

    /// The timeout middleware expired before the wrapped chain settled.
    #[error("Operation timed out after {duration:?}")]
    MiddlewareTimeout {
        /// The configured limit that was exceeded.
        duration: Duration,
    },

    /// The rate-limit middleware found the bucket empty.
    #[error("Rate limit \"{name}\" exceeded")]
    MiddlewareRateLimitExceeded {
        /// The named bucket that rejected the call.
        name: String,
        /// Hint for when a token will be available again.
        retry_after: Option<Duration>,
    },

    /// The circuit-breaker middleware is open for this target.
    #[error("Circuit breaker \"{name}\" is open")]
    MiddlewareCircuitBreakerOpen {
        /// The named breaker that rejected the call.
        name: String,
        /// Time left until the breaker transitions to half-open.
        retry_after: Option<Duration>,
    },

    /// A durable-execution envelope failed to persist or resume.
    #[error("Durable execution failure: {message}")]
    DurableExecution {
        /// What went wrong.
        message: String,
    },

    /// A queue task re-entered its own queue (or an equivalent self-wait).
    #[error("Deadlock detected: {what}")]
    Deadlock {
        /// Description of the self-wait.
        what: String,
    },

    /// An operation reached a component after its disposal.
    #[error("{what} has been disposed")]
    Disposed {
        /// The disposed component.
        what: String,
    },

    /// The operation was cancelled before completion.
    #[error("Operation was aborted")]
    Aborted,

    /// A user task or hook failed. The message carries the user-facing
    /// description; the original error (when any) rides along.
    #[error("{message}")]
    Task {
        /// User-facing failure description.
        message: String,
        /// The original error, if the task surfaced one.
        #[cfg_attr(feature = "serde", serde(skip))]
        source: Option<Arc<anyhow::Error>>,
    },

    /// A kernel invariant was violated. Reaching this is a bug in Runner.
    #[error("Internal runner error: {message}")]
    Internal {
        /// Description of the broken invariant.
        message: String,
    },
}

impl RunnerError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Duplicate { .. } => "DUPLICATE_REGISTRATION",
            Self::UnknownItemType { .. } => "UNKNOWN_ITEM_TYPE",
            Self::DependencyNotFound { .. } => "DEPENDENCY_NOT_FOUND",
            Self::EventNotFound { .. } => "EVENT_NOT_FOUND",
            Self::CircularDependencies { .. } => "CIRCULAR_DEPENDENCIES",
            Self::EventEmissionCycle { .. } => "EVENT_EMISSION_CYCLE",
            Self::Locked { .. } => "LOCKED",
            Self::StoreAlreadyInitialized => "STORE_ALREADY_INITIALIZED",
            Self::Validation { .. } => "VALIDATION",
            Self::PlatformUnsupported { .. } => "PLATFORM_UNSUPPORTED",
            Self::PhantomTaskNotRouted { .. } => "PHANTOM_TASK_NOT_ROUTED",
            Self::MiddlewareTimeout { .. } => "MIDDLEWARE_TIMEOUT",
            Self::MiddlewareRateLimitExceeded { .. } => "MIDDLEWARE_RATE_LIMIT_EXCEEDED",
            Self::MiddlewareCircuitBreakerOpen { .. } => "MIDDLEWARE_CIRCUIT_BREAKER_OPEN",
            Self::DurableExecution { .. } => "DURABLE_EXECUTION",
            Self::Deadlock { .. } => "DEADLOCK",
            Self::Disposed { .. } => "DISPOSED",
            Self::Aborted => "ABORTED",
            Self::Task { .. } => "TASK_FAILURE",
            Self::Internal { .. } => "INTERNAL",
        }
    }

    /// Coarse classification used by the propagation policy.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Duplicate { .. }
            | Self::UnknownItemType { .. }
            | Self::DependencyNotFound { .. }
            | Self::EventNotFound { .. }
            | Self::CircularDependencies { .. }
            | Self::EventEmissionCycle { .. }
            | Self::Locked { .. }
            | Self::StoreAlreadyInitialized => ErrorKind::Configuration,
            Self::Validation { .. } => ErrorKind::Validation,
            _ => ErrorKind::Runtime,
        }
    }

    /// Whether the retry middleware may re-attempt after this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::MiddlewareTimeout { .. }
            | Self::MiddlewareRateLimitExceeded { .. }
            | Self::Task { .. } => true,
            Self::MiddlewareCircuitBreakerOpen { .. } => false,
            _ => false,
        }
    }

    /// Suggested wait before retrying, when the failing component knows one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::MiddlewareRateLimitExceeded { retry_after, .. }
            | Self::MiddlewareCircuitBreakerOpen { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    // -----------------------------------------------------------------------
    // Constructors
    // -----------------------------------------------------------------------

    /// Duplicate registration for `id`, first claimed as `kind`.
    pub fn duplicate(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::Duplicate { kind: kind.into(), id: id.into() }
    }

    /// Missing dependency; `kind` and `id` are joined into the lookup key.
    pub fn dependency_not_found(kind: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::DependencyNotFound { key: format!("{kind} {id}") }
    }

    /// Validation failure for `id`, described by `subject`.
    pub fn validation(
        subject: impl Into<String>,
        id: impl Into<String>,
        cause: impl Into<String>,
    ) -> Self {
        Self::Validation { subject: subject.into(), id: id.into(), cause: cause.into() }
    }

    /// Mutation of a locked component.
    pub fn locked(what: impl Into<String>) -> Self {
        Self::Locked { what: what.into() }
    }

    /// Operation on a disposed component.
    pub fn disposed(what: impl Into<String>) -> Self {
        Self::Disposed { what: what.into() }
    }

    /// Unsupported platform operation.
    pub fn platform_unsupported(function: impl Into<String>) -> Self {
        Self::PlatformUnsupported { function: function.into() }
    }

    /// User-task failure with a plain message.
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task { message: message.into(), source: None }
    }

    /// Broken kernel invariant.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    // -----------------------------------------------------------------------
    // Predicates (the `.is(e)` surface)
    // -----------------------------------------------------------------------

    /// True for [`RunnerError::Duplicate`].
    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }

    /// True for [`RunnerError::DependencyNotFound`].
    #[must_use]
    pub fn is_dependency_not_found(&self) -> bool {
        matches!(self, Self::DependencyNotFound { .. })
    }

    /// True for [`RunnerError::CircularDependencies`].
    #[must_use]
    pub fn is_circular_dependencies(&self) -> bool {
        matches!(self, Self::CircularDependencies { .. })
    }

    /// True for [`RunnerError::EventEmissionCycle`].
    #[must_use]
    pub fn is_event_emission_cycle(&self) -> bool {
        matches!(self, Self::EventEmissionCycle { .. })
    }

    /// True for [`RunnerError::Locked`].
    #[must_use]
    pub fn is_locked(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }

    /// True for [`RunnerError::Validation`].
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// True for [`RunnerError::PlatformUnsupported`].
    #[must_use]
    pub fn is_platform_unsupported(&self) -> bool {
        matches!(self, Self::PlatformUnsupported { .. })
    }

    /// True for [`RunnerError::MiddlewareTimeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::MiddlewareTimeout { .. })
    }

    /// True for [`RunnerError::MiddlewareRateLimitExceeded`].
    #[must_use]
    pub fn is_rate_limit_exceeded(&self) -> bool {
        matches!(self, Self::MiddlewareRateLimitExceeded { .. })
    }

    /// True for [`RunnerError::MiddlewareCircuitBreakerOpen`].
    #[must_use]
    pub fn is_circuit_breaker_open(&self) -> bool {
        matches!(self, Self::MiddlewareCircuitBreakerOpen { .. })
    }

    /// True for [`RunnerError::Deadlock`].
    #[must_use]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, Self::Deadlock { .. })
    }

    /// True for [`RunnerError::Disposed`].
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed { .. })
    }

    /// True for [`RunnerError::Aborted`].
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}

impl From<anyhow::Error> for RunnerError {
    fn from(err: anyhow::Error) -> Self {
        Self::Task { message: err.to_string(), source: Some(Arc::new(err)) }
    }
}
