use std::future::Future;
use std::time::Duration;

use crate::error::AppError;

/// Retry configuration with exponential backoff.
///
/// The first retry waits `base_delay`; each later retry multiplies the
/// previous delay by `backoff_factor`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the given retry (1-indexed).
    ///
    /// - Retry 1: `base_delay`
    /// - Retry n: `base_delay * backoff_factor^(n-1)`, capped by `max_delay`
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// The same policy with retries disabled, used for half-open trial calls.
    pub fn single_attempt(&self) -> Self {
        Self {
            max_retries: 0,
            ..self.clone()
        }
    }
}

/// Source of delays between attempts and polls.
///
/// Production code sleeps on the tokio timer; tests substitute a recorder.
pub trait Sleeper: Send + Sync + Clone {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Runs `operation` until it succeeds, fails permanently, or runs out of retries.
pub async fn retry_with_backoff<T, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    label: &str,
    mut operation: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
    S: Sleeper,
{
    let mut retry = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && retry < policy.max_retries => {
                retry += 1;
                let delay = policy.delay_for_retry(retry);
                tracing::warn!(
                    operation = %label,
                    attempt = retry,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                sleeper.sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        operation = %label,
                        attempts = retry + 1,
                        error = %e,
                        "All attempts failed"
                    );
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::testutil::RecordingSleeper;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_delay_schedule() {
        let p = policy();
        assert_eq!(p.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(p.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(p.delay_for_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let p = RetryPolicy {
            max_delay: Duration::from_millis(250),
            ..policy()
        };
        assert_eq!(p.delay_for_retry(5), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let sleeper = RecordingSleeper::new();
        let calls = Arc::new(AtomicU32::new(0));
        let k = 2;

        let counter = calls.clone();
        let result = retry_with_backoff(&policy(), &sleeper, "fetch", move || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < k {
                    Err(AppError::NetworkError("reset".into()))
                } else {
                    Ok("page")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "page");
        assert_eq!(calls.load(Ordering::SeqCst), k + 1);

        let slept = sleeper.recorded();
        assert_eq!(slept.len(), k as usize);
        assert!(slept.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let sleeper = RecordingSleeper::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&policy(), &sleeper, "fetch", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::from_status(404, "not found"))
            }
        })
        .await;

        assert!(matches!(
            result,
            Err(AppError::ServiceError {
                status_code: 404,
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let sleeper = RecordingSleeper::new();
        let calls = Arc::new(AtomicU32::new(0));

        let counter = calls.clone();
        let result: Result<(), _> = retry_with_backoff(&policy(), &sleeper, "poll", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(AppError::Timeout(5))
            }
        })
        .await;

        assert!(matches!(result, Err(AppError::Timeout(5))));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(
            sleeper.recorded(),
            vec![
                Duration::from_millis(100),
                Duration::from_millis(200),
                Duration::from_millis(400)
            ]
        );
    }

    #[tokio::test]
    async fn single_attempt_policy_never_sleeps() {
        let sleeper = RecordingSleeper::new();
        let result: Result<(), _> =
            retry_with_backoff(&policy().single_attempt(), &sleeper, "submit", || async {
                Err(AppError::RateLimitExceeded)
            })
            .await;

        assert!(matches!(result, Err(AppError::RateLimitExceeded)));
        assert!(sleeper.recorded().is_empty());
    }
}
