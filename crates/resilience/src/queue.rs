//! Single-flight FIFO queue with deadlock detection.
//!
//! Tasks run strictly one at a time in submission order. A task that calls
//! [`Queue::run`] on its own queue would wait on itself forever; the queue
//! detects this through a task-local marker and rejects before enqueuing.
//! Where the platform lacks task-local storage the detection degrades to
//! best-effort (no marker, no check).

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use runner_error::{RunnerError, RunnerResult};
use runner_log::trace;
use runner_platform::ContextStorage;
use tokio_util::sync::CancellationToken;

/// Lifecycle notifications emitted by a [`Queue`].
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// A task entered the line.
    Enqueued,
    /// A task reached the head of the line and started running.
    Started,
    /// The running task resolved.
    Finished,
    /// The running task rejected.
    Errored {
        /// The task's error.
        error: RunnerError,
    },
    /// A queued task was skipped by a cancelling disposal.
    Cancelled,
    /// The queue finished disposing.
    Disposed,
}

impl QueueEvent {
    /// Stable name used for listener filtering in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            QueueEvent::Enqueued => "enqueue",
            QueueEvent::Started => "start",
            QueueEvent::Finished => "finish",
            QueueEvent::Errored { .. } => "error",
            QueueEvent::Cancelled => "cancel",
            QueueEvent::Disposed => "disposed",
        }
    }
}

/// Options for [`Queue::dispose`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DisposeOptions {
    /// Cancel the running task and skip queued ones instead of draining.
    pub cancel: bool,
}

struct QueueListener {
    id: u64,
    once: bool,
    handler: Arc<dyn Fn(&QueueEvent) + Send + Sync>,
}

/// Single-flight cooperative FIFO queue.
pub struct Queue {
    /// The line. The tokio mutex is fair, so lock acquisition order is
    /// submission order.
    line: tokio::sync::Mutex<()>,
    /// Set on dispose; new submissions reject immediately.
    disposed: AtomicBool,
    /// Set by a cancelling dispose; queued-but-not-started tasks reject.
    cancelled: AtomicBool,
    /// Cancellation handle passed to the running task.
    token: Mutex<CancellationToken>,
    /// Marker slot: present while a task of this queue is running.
    marker: ContextStorage,
    listeners: Mutex<Vec<QueueListener>>,
    next_listener_id: AtomicU64,
}

impl Queue {
    /// New queue using the given context storage for deadlock detection.
    ///
    /// Pass `platform.context_storage()`; an unsupported storage quietly
    /// turns detection off.
    #[must_use]
    pub fn new(marker: ContextStorage) -> Self {
        Self {
            line: tokio::sync::Mutex::new(()),
            disposed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            token: Mutex::new(CancellationToken::new()),
            marker,
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(0),
        }
    }

    /// Subscribe to queue events. Returns an id for [`Queue::off`].
    pub fn on(&self, handler: impl Fn(&QueueEvent) + Send + Sync + 'static) -> u64 {
        self.subscribe(handler, false)
    }

    /// Subscribe for a single event; the listener is removed after it fires.
    pub fn once(&self, handler: impl Fn(&QueueEvent) + Send + Sync + 'static) -> u64 {
        self.subscribe(handler, true)
    }

    /// Remove a listener. Removal is hard: the handler is dropped, not
    /// masked.
    pub fn off(&self, id: u64) {
        self.listeners.lock().retain(|l| l.id != id);
    }

    fn subscribe(&self, handler: impl Fn(&QueueEvent) + Send + Sync + 'static, once: bool) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(QueueListener { id, once, handler: Arc::new(handler) });
        id
    }

    fn emit(&self, event: &QueueEvent) {
        let snapshot: Vec<(u64, bool, Arc<dyn Fn(&QueueEvent) + Send + Sync>)> = {
            let listeners = self.listeners.lock();
            listeners.iter().map(|l| (l.id, l.once, Arc::clone(&l.handler))).collect()
        };
        for (id, once, handler) in snapshot {
            handler(event);
            if once {
                self.off(id);
            }
        }
    }

    /// Whether this call site is already inside a task of this queue.
    fn is_reentrant(&self) -> bool {
        matches!(self.marker.get::<()>(), Ok(Some(_)))
    }

    /// Run `task` when it reaches the head of the line.
    ///
    /// The task receives a [`CancellationToken`] that fires when the queue
    /// is disposed with `cancel: true`; cooperation is the task's choice.
    /// Re-entrant submission fails with a deadlock error before enqueuing.
    pub async fn run<T, F, Fut>(&self, task: F) -> RunnerResult<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = RunnerResult<T>>,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RunnerError::disposed("Queue"));
        }
        if self.is_reentrant() {
            return Err(RunnerError::Deadlock {
                what: "Queue::run called from a task running on the same queue".to_string(),
            });
        }

        self.emit(&QueueEvent::Enqueued);
        let _guard = self.line.lock().await;

        // Disposal may have happened while we waited in line.
        if self.cancelled.load(Ordering::SeqCst) {
            self.emit(&QueueEvent::Cancelled);
            return Err(RunnerError::Aborted);
        }
        if self.disposed.load(Ordering::SeqCst) {
            return Err(RunnerError::disposed("Queue"));
        }

        self.emit(&QueueEvent::Started);
        let token = self.token.lock().child_token();
        let fut = task(token);

        let result = if self.marker.is_supported() {
            self.marker.scope(Arc::new(()), fut).await?
        } else {
            // No task-local storage: run unmarked, detection is best-effort.
            fut.await
        };

        match &result {
            Ok(_) => self.emit(&QueueEvent::Finished),
            Err(error) => self.emit(&QueueEvent::Errored { error: error.clone() }),
        }
        result
    }

    /// Dispose the queue.
    ///
    /// Default: drain — tasks already in line run to completion, new
    /// submissions reject. With `cancel: true`: the running task's token
    /// fires, queued tasks reject with `Aborted`, and the internal token is
    /// refreshed so nothing cancelled leaks into later use.
    ///
    /// Errors that tasks already reported are not re-emitted here.
    pub async fn dispose(&self, options: DisposeOptions) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if options.cancel {
            self.cancelled.store(true, Ordering::SeqCst);
            self.token.lock().cancel();
        }

        // Wait until the line empties: every queued task either ran
        // (drain) or rejected (cancel).
        let _guard = self.line.lock().await;

        if options.cancel {
            // Fresh token so a holder of the queue cannot observe a
            // pre-cancelled token later.
            *self.token.lock() = CancellationToken::new();
            self.cancelled.store(false, Ordering::SeqCst);
        }
        trace!(cancel = options.cancel, "queue disposed");
        self.emit(&QueueEvent::Disposed);
    }

    /// Whether [`Queue::dispose`] ran.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("disposed", &self.is_disposed())
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}
