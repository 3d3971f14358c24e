//! Bounded retry with exponential backoff
//!
//! Used for SQLite lock contention on task writes and for re-establishing
//! the gateway's Result Bus subscription. Every loop is bounded by an
//! attempt count, a total wait, or both.

use std::future::Future;
use std::time::{Duration, Instant};

use kindred_common::{Error, Result};

/// Backoff schedule and retry bounds
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Give up after this many attempts (None = bounded by `max_wait` only)
    pub max_attempts: Option<u32>,
    /// Give up once this much time has elapsed (None = bounded by attempts only)
    pub max_wait: Option<Duration>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Lock-contention schedule: 10ms doubling to 1000ms, bounded by total wait
    pub fn lock_contention(max_wait_ms: u64) -> Self {
        Self {
            max_attempts: None,
            max_wait: Some(Duration::from_millis(max_wait_ms)),
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(1000),
        }
    }

    /// Attempt-bounded schedule
    pub fn attempts(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            max_wait: None,
            initial_backoff,
            max_backoff,
        }
    }

    /// Backoff before attempt `attempt + 1` (attempt is 1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }

    fn exhausted(&self, attempt: u32, elapsed: Duration) -> bool {
        let attempts_spent = self.max_attempts.is_some_and(|max| attempt >= max);
        let time_spent = self.max_wait.is_some_and(|max| elapsed >= max);
        if self.max_attempts.is_none() && self.max_wait.is_none() {
            // Unbounded policies are not allowed; treat as single attempt
            return true;
        }
        attempts_spent || time_spent
    }
}

/// Retry `operation` while `is_transient` classifies its error as retryable
///
/// Non-transient errors are returned immediately. When the policy is
/// exhausted the last error is returned.
pub async fn retry_with_backoff<F, Fut, T, E, C>(
    operation_name: &str,
    policy: &RetryPolicy,
    is_transient: C,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let start_time = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(err) if !is_transient(&err) => return Err(err),
            Err(err) => {
                let elapsed = start_time.elapsed();
                if policy.exhausted(attempt, elapsed) {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        error = %err,
                        "Retries exhausted"
                    );
                    return Err(err);
                }

                let backoff = policy.backoff_for(attempt);
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "Transient failure, will retry after backoff"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Retry a database operation on SQLite lock contention until `max_wait_ms` elapses
pub async fn retry_on_lock<F, Fut, T>(operation_name: &str, max_wait_ms: u64, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff(
        operation_name,
        &RetryPolicy::lock_contention(max_wait_ms),
        Error::is_lock_contention,
        operation,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, PartialEq)]
    enum TestError {
        Busy,
        Fatal,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::attempts(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::lock_contention(5000);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(10));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(20));
        assert_eq!(policy.backoff_for(8), Duration::from_millis(1000));
        assert_eq!(policy.backoff_for(40), Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_errors() {
        let attempts = AtomicU32::new(0);

        let result = retry_with_backoff(
            "test_op",
            &fast_policy(5),
            |e: &TestError| *e == TestError::Busy,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(TestError::Busy)
                    } else {
                        Ok(n)
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), _> = retry_with_backoff(
            "test_op",
            &fast_policy(4),
            |_: &TestError| true,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Busy) }
            },
        )
        .await;

        assert_eq!(result, Err(TestError::Busy));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let attempts = AtomicU32::new(0);

        let result: std::result::Result<(), _> = retry_with_backoff(
            "test_op",
            &fast_policy(5),
            |e: &TestError| *e == TestError::Busy,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err(TestError::Fatal) }
            },
        )
        .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_on_lock_passes_other_errors_through() {
        let result = retry_on_lock("test_op", 50, || async {
            Err::<i32, Error>(Error::Internal("other error".to_string()))
        })
        .await;

        assert!(matches!(result, Err(Error::Internal(_))));
    }
}
