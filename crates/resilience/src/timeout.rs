//! Timeout wrapper over the host timer.

use std::future::Future;
use std::time::Duration;

use runner_error::{RunnerError, RunnerResult};

/// Race `future` against `duration`.
///
/// The loser is dropped; cancellation beyond that is cooperative (callers
/// that hold a `CancellationToken` should also wire it to the same
/// deadline).
pub async fn timeout<T, F>(duration: Duration, future: F) -> RunnerResult<T>
where
    F: Future<Output = RunnerResult<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(RunnerError::MiddlewareTimeout { duration }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_in_time() {
        let value = timeout(Duration::from_millis(100), async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn original_error_wins_over_deadline() {
        let err = timeout(Duration::from_millis(100), async {
            Err::<(), _>(RunnerError::task("inner"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "inner");
    }

    #[tokio::test]
    async fn expiry_maps_to_middleware_timeout() {
        let err = timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.code(), "MIDDLEWARE_TIMEOUT");
    }
}
