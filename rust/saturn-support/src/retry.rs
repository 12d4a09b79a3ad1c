// saturn-support: generic retry executor with exponential backoff.
//
// This is deliberately distinct from the consumer's retry ladder (see
// saturn-consumer, which implements the spec's own exponential/fixed
// backoff schedules against the broker). This executor is for internal
// calls to ambient services -- the proxy pool, the credential pool --
// where a handful of quick local retries smooth over blips without
// involving the broker at all.

use crate::error::{is_retryable, SupportError, SupportResult};
use tokio::time::{sleep, Duration};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub async fn execute<F, Fut, T>(&self, mut f: F) -> SupportResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = SupportResult<T>>,
    {
        let mut last_error = None;
        let mut delay_ms = self.config.initial_delay_ms;

        for attempt in 0..=self.config.max_retries {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable(&e) {
                        return Err(e);
                    }
                    if attempt >= self.config.max_retries {
                        return Err(SupportError::RetryExhausted(format!(
                            "max retries ({}) exceeded, last error: {}",
                            self.config.max_retries, e
                        )));
                    }
                    last_error = Some(e);
                    sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = ((delay_ms as f64) * self.config.multiplier) as u64;
                    delay_ms = delay_ms.min(self.config.max_delay_ms);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| SupportError::Internal("retry loop exited without error".into())))
    }
}

/// Exponential backoff for a handler failure, per the consumer's retry
/// ladder: `min(60 * 2^(retry_count-1), 300)` seconds.
pub fn handler_failure_backoff_secs(retry_count: u32) -> u64 {
    let exp = retry_count.saturating_sub(1);
    let delay = 60u64.saturating_mul(1u64 << exp.min(40));
    delay.min(300)
}

/// Fixed backoff applied after a timeout, per the consumer's retry ladder.
pub const TIMEOUT_RETRY_DELAY_SECS: u64 = 300;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_ladder_matches_spec() {
        assert_eq!(handler_failure_backoff_secs(1), 60);
        assert_eq!(handler_failure_backoff_secs(2), 120);
        assert_eq!(handler_failure_backoff_secs(3), 240);
        assert_eq!(handler_failure_backoff_secs(4), 300); // capped at 5 minutes
        assert_eq!(handler_failure_backoff_secs(10), 300);
    }

    #[tokio::test]
    async fn retry_executor_gives_up_on_non_retryable_error() {
        let executor = RetryExecutor::new(RetryConfig::default());
        let mut calls = 0;
        let result: SupportResult<()> = executor
            .execute(|| {
                calls += 1;
                async { Err(SupportError::Config("bad config".into())) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn retry_executor_succeeds_after_transient_failures() {
        let executor = RetryExecutor::new(RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            multiplier: 1.0,
        });
        let mut attempts = 0;
        let result = executor
            .execute(|| {
                attempts += 1;
                async move {
                    if attempts < 3 {
                        Err(SupportError::Network("transient".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
        assert_eq!(attempts, 3);
    }
}
