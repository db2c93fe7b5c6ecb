//! Retry with exponential backoff for transient provider failures.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Exponential backoff with the given number of retries and a 500 ms
    /// base delay.
    #[must_use]
    pub fn exponential(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Delay before retry attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3)
    }
}

/// Run `operation`, retrying transient errors per the policy. Non-transient
/// errors return immediately; exhausted retries surface as
/// [`Error::LlmUnavailable`].
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, ?delay, error = %err, "retrying transient LLM failure");
                tokio::time::sleep(delay).await;
            }
            Err(Error::LlmTransient(message)) => {
                return Err(Error::LlmUnavailable(format!(
                    "retries exhausted after {attempt} attempts: {message}"
                )));
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_then_succeeds() {
        let policy = RetryPolicy::exponential(3).with_base_delay(Duration::from_millis(1));
        let attempts = AtomicU32::new(0);
        let result = with_retry(&policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::LlmTransient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_surfaces_unavailable() {
        let policy = RetryPolicy::exponential(1).with_base_delay(Duration::from_millis(1));
        let result: Result<()> =
            with_retry(&policy, || async { Err(Error::LlmTransient("502".into())) }).await;
        assert!(matches!(result, Err(Error::LlmUnavailable(_))));
    }

    #[tokio::test]
    async fn non_transient_errors_pass_through() {
        let policy = RetryPolicy::exponential(5);
        let result: Result<()> = with_retry(&policy, || async {
            Err(Error::LlmBadFormat("not json".into()))
        })
        .await;
        assert!(matches!(result, Err(Error::LlmBadFormat(_))));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(2),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(6), Duration::from_secs(2));
    }
}
