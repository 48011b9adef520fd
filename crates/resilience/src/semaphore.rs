//! Counting semaphore with FIFO fairness and weighted permits.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use runner_error::{RunnerError, RunnerResult};
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

/// Counting semaphore wrapping tokio's (fair) semaphore.
///
/// Waiters resume in FIFO order. Permits are RAII: dropping a [`Permit`]
/// releases its weight.
#[derive(Debug, Clone)]
pub struct Semaphore {
    inner: Arc<tokio::sync::Semaphore>,
    limit: usize,
    waiting: Arc<AtomicUsize>,
}

/// A held permit. Releases its weight on drop.
#[derive(Debug)]
pub struct Permit {
    _inner: OwnedSemaphorePermit,
    weight: u32,
}

impl Permit {
    /// The weight this permit holds.
    #[must_use]
    pub fn weight(&self) -> u32 {
        self.weight
    }
}

struct WaitGuard(Arc<AtomicUsize>);

impl WaitGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Semaphore {
    /// New semaphore with `limit` permits.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Semaphore::new(limit)),
            limit,
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The configured limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Permits currently available.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.available_permits()
    }

    /// Callers currently parked in [`Semaphore::acquire`].
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Acquire one permit, waiting FIFO behind earlier callers.
    pub async fn acquire(&self) -> RunnerResult<Permit> {
        self.acquire_weighted(1).await
    }

    /// Acquire `weight` permits at once.
    pub async fn acquire_weighted(&self, weight: u32) -> RunnerResult<Permit> {
        let _wait = WaitGuard::new(&self.waiting);
        let permit = Arc::clone(&self.inner)
            .acquire_many_owned(weight)
            .await
            .map_err(|_| RunnerError::disposed("Semaphore"))?;
        Ok(Permit { _inner: permit, weight })
    }

    /// Acquire one permit unless `token` fires first.
    pub async fn acquire_with_token(&self, token: &CancellationToken) -> RunnerResult<Permit> {
        let _wait = WaitGuard::new(&self.waiting);
        tokio::select! {
            biased;
            () = token.cancelled() => Err(RunnerError::Aborted),
            permit = Arc::clone(&self.inner).acquire_many_owned(1) => {
                let permit = permit.map_err(|_| RunnerError::disposed("Semaphore"))?;
                Ok(Permit { _inner: permit, weight: 1 })
            }
        }
    }

    /// Take a permit only if one is free right now.
    #[must_use]
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.inner)
            .try_acquire_many_owned(1)
            .ok()
            .map(|permit| Permit { _inner: permit, weight: 1 })
    }

    /// Reject all current and future waiters.
    pub fn close(&self) {
        self.inner.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn at_most_limit_holders() {
        let semaphore = Semaphore::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let semaphore = semaphore.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn waiters_resume_fifo() {
        let semaphore = Semaphore::new(1);
        let first = semaphore.acquire().await.unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..3 {
            let semaphore = semaphore.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.unwrap();
                order.lock().push(i);
            }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(semaphore.waiting(), 3);
        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(semaphore.waiting(), 0);
    }

    #[tokio::test]
    async fn weighted_acquire_takes_multiple_permits() {
        let semaphore = Semaphore::new(3);
        let permit = semaphore.acquire_weighted(2).await.unwrap();
        assert_eq!(permit.weight(), 2);
        assert_eq!(semaphore.available(), 1);
        drop(permit);
        assert_eq!(semaphore.available(), 3);
    }

    #[tokio::test]
    async fn try_acquire_does_not_wait() {
        let semaphore = Semaphore::new(1);
        let held = semaphore.try_acquire().unwrap();
        assert!(semaphore.try_acquire().is_none());
        drop(held);
        assert!(semaphore.try_acquire().is_some());
    }

    #[tokio::test]
    async fn cancellation_aborts_waiter() {
        let semaphore = Semaphore::new(1);
        let _held = semaphore.acquire().await.unwrap();
        let token = CancellationToken::new();

        let waiter = {
            let semaphore = semaphore.clone();
            let token = token.clone();
            tokio::spawn(async move { semaphore.acquire_with_token(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(err.is_aborted());
        assert_eq!(semaphore.waiting(), 0);
    }
}
