//! Temporal coalescing: debounce and throttle.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-key debouncer: only the latest call within a quiet window survives.
///
/// [`Debouncer::acquire`] waits out the quiet window; it resolves `true`
/// for the call that was still the latest when the window closed and
/// `false` for calls superseded in the meantime.
#[derive(Debug)]
pub struct Debouncer {
    quiet: Duration,
    generations: Mutex<HashMap<String, u64>>,
}

impl Debouncer {
    /// New debouncer with the given quiet window.
    #[must_use]
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, generations: Mutex::new(HashMap::new()) }
    }

    /// Wait out the quiet window for `key`.
    pub async fn acquire(&self, key: &str) -> bool {
        let my_generation = {
            let mut generations = self.generations.lock();
            let entry = generations.entry(key.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        tokio::time::sleep(self.quiet).await;
        let generations = self.generations.lock();
        generations.get(key) == Some(&my_generation)
    }
}

/// Per-key throttler: at most one call per window, leading edge wins.
#[derive(Debug)]
pub struct Throttler {
    window: Duration,
    last_pass: Mutex<HashMap<String, Instant>>,
}

impl Throttler {
    /// New throttler with the given window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window, last_pass: Mutex::new(HashMap::new()) }
    }

    /// Let `key` through, or report how long until the window reopens.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let mut last_pass = self.last_pass.lock();
        let now = Instant::now();
        match last_pass.get(key) {
            Some(last) if now.duration_since(*last) < self.window => {
                Err(self.window - now.duration_since(*last))
            }
            _ => {
                last_pass.insert(key.to_string(), now);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn latest_debounced_call_wins() {
        let debouncer = Arc::new(Debouncer::new(Duration::from_millis(20)));

        let first = {
            let debouncer = Arc::clone(&debouncer);
            tokio::spawn(async move { debouncer.acquire("k").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        let second = {
            let debouncer = Arc::clone(&debouncer);
            tokio::spawn(async move { debouncer.acquire("k").await })
        };

        assert!(!first.await.unwrap(), "superseded call must lose");
        assert!(second.await.unwrap(), "latest call must win");
    }

    #[tokio::test]
    async fn debounce_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(5));
        assert!(debouncer.acquire("a").await);
        assert!(debouncer.acquire("b").await);
    }

    #[test]
    fn throttle_leading_edge_passes_then_rejects() {
        let throttler = Throttler::new(Duration::from_millis(50));
        assert!(throttler.try_acquire("k").is_ok());
        let wait = throttler.try_acquire("k").unwrap_err();
        assert!(wait <= Duration::from_millis(50));
        assert!(throttler.try_acquire("other").is_ok());
    }

    #[test]
    fn throttle_window_reopens() {
        let throttler = Throttler::new(Duration::from_millis(5));
        assert!(throttler.try_acquire("k").is_ok());
        std::thread::sleep(Duration::from_millis(10));
        assert!(throttler.try_acquire("k").is_ok());
    }
}
