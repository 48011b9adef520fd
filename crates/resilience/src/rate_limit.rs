//! Token-bucket rate limiter with wall-clock refill.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Classic token bucket: `capacity` tokens, refilled continuously at
/// `refill_per_sec`. Non-blocking — callers decide whether a rejection is
/// an error or a wait.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl std::fmt::Debug for BucketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketState").field("tokens", &self.tokens).finish()
    }
}

impl TokenBucket {
    /// New bucket starting full.
    ///
    /// `refill_per_sec` is clamped to a sane positive range so a
    /// misconfigured bucket degrades instead of dividing by zero.
    #[must_use]
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            refill_per_sec: refill_per_sec.clamp(0.001, 1_000_000.0),
            state: Mutex::new(BucketState { tokens: capacity, last_refill: Instant::now() }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    pub fn try_take(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - state.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    /// Tokens currently available (after refill).
    #[must_use]
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_up_to_capacity_then_rejects() {
        let bucket = TokenBucket::new(3, 0.001);
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_ok());

        let retry_after = bucket.try_take().unwrap_err();
        assert!(retry_after > Duration::ZERO);
    }

    #[test]
    fn refills_by_wall_clock() {
        let bucket = TokenBucket::new(1, 1000.0);
        assert!(bucket.try_take().is_ok());
        assert!(bucket.try_take().is_err());

        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.try_take().is_ok(), "bucket should refill at 1000/s");
    }

    #[test]
    fn never_exceeds_capacity() {
        let bucket = TokenBucket::new(2, 1_000_000.0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(bucket.available() <= 2.0);
    }
}
