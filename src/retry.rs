use std::{future::Future, time::Duration};

use tracing::warn;

use crate::error::Result;

/// Bounded retry with linear backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt that follows `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt).min(self.max_delay)
    }
}

/// Runs `call` until it succeeds, fails with a non-transient error, or the
/// policy's attempt budget is spent.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::Error;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(150),
        }
    }

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = fast_policy();
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2), Duration::from_millis(150));
        assert_eq!(policy.delay_after(7), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = retry(&fast_policy(), "search", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::Unavailable("busy".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_surface_the_last_error() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast_policy(), "search", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Unavailable("still busy".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_propagate_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry(&fast_policy(), "openai", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(Error::Payload("bad".into()))
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
