//! Retry loop that runs inside the execution slot

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::reliability::RetryPolicy;
use crate::task::{Task, TaskError};

/// Wraps a task so that one submission keeps re-invoking it until it succeeds
///
/// The slot stays occupied across retries, and backoff delays are slept
/// inside the slot. The loop is bounded by the policy; with the default
/// unbounded policy it retries forever. The attempt count of the most recent
/// call is available through [`InPlaceRetry::last_attempts`].
pub struct InPlaceRetry<R> {
    inner: Arc<dyn Task<R>>,
    policy: RetryPolicy,
    last_attempts: AtomicU32,
}

impl<R: Send + 'static> InPlaceRetry<R> {
    /// Wrap `task` with `policy`
    pub fn new<T: Task<R>>(task: T, policy: RetryPolicy) -> Self {
        Self::from_shared(Arc::new(task), policy)
    }

    pub(crate) fn from_shared(inner: Arc<dyn Task<R>>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            last_attempts: AtomicU32::new(0),
        }
    }

    /// Attempts made by the latest `call`, 0 before the first
    pub fn last_attempts(&self) -> u32 {
        self.last_attempts.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<R: Send + 'static> Task<R> for InPlaceRetry<R> {
    async fn call(&self) -> Result<R, TaskError> {
        let mut attempt = 1;
        loop {
            self.last_attempts.store(attempt, Ordering::Release);

            let error = match self.inner.call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.policy.allows_retry(&error, attempt) {
                return Err(error);
            }

            attempt += 1;
            let delay = self.policy.delay_for_attempt(attempt);
            debug!(attempt, delay_ms = delay.as_millis() as u64, error = %error, "Retrying in place");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;

    fn fails_times(failures: u32) -> (impl Task<u32>, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = move || {
            let counter = Arc::clone(&counter);
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if call <= failures {
                    Err(TaskError::retryable(format!("failure {}", call)))
                } else {
                    Ok(call)
                }
            }
        };
        (task, calls)
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let (task, calls) = fails_times(3);
        let retry = InPlaceRetry::new(task, RetryPolicy::default());

        assert_eq!(retry.call().await, Ok(4));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retry.last_attempts(), 4);
    }

    #[tokio::test]
    async fn test_stops_at_attempt_ceiling() {
        let (task, calls) = fails_times(10);
        let retry = InPlaceRetry::new(task, RetryPolicy::default().with_max_attempts(3));

        let err = retry.call().await.unwrap_err();
        assert_eq!(err.message, "failure 3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_returned_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let retry = InPlaceRetry::new(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(TaskError::non_retryable("bad input")) }
            },
            RetryPolicy::default(),
        );

        assert!(retry.call().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_backoff_is_applied_between_attempts() {
        let (task, _) = fails_times(2);
        let retry = InPlaceRetry::new(task, RetryPolicy::fixed(Duration::from_millis(15), 5));

        let started = Instant::now();
        assert_eq!(retry.call().await, Ok(3));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
