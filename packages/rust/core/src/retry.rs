//! Bounded retry with capped exponential backoff, and adapter timeouts.
//!
//! Only retryable failures (`NETWORK`, `SERVICE_ERROR`) are repeated. The
//! retry loop wraps a single adapter call; response parsing happens after it
//! returns, so a `PARSE_ERROR` never triggers another call.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use docmodern_shared::{PipelineConfig, StageFailure};

/// How many times, and how patiently, a failed adapter call is repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Whether another attempt is allowed after `retry_count` retries.
    pub fn should_retry(&self, failure: &StageFailure, retry_count: u32) -> bool {
        retry_count < self.max_retries && failure.is_retryable()
    }

    pub fn backoff(&self, retry_count: u32) -> Duration {
        calculate_backoff(retry_count, self.base_delay, self.max_delay)
    }
}

impl From<&PipelineConfig> for RetryPolicy {
    fn from(config: &PipelineConfig) -> Self {
        Self::new(
            config.max_retries,
            config.retry_backoff,
            config.retry_backoff_max,
        )
    }
}

/// Delay before retry number `retry_count` (1-based): `base * 2^(n-1)`,
/// capped at `max`. Retry 0 has no delay.
pub fn calculate_backoff(retry_count: u32, base: Duration, max: Duration) -> Duration {
    if retry_count == 0 {
        return Duration::ZERO;
    }

    let multiplier = 2u32.saturating_pow(retry_count - 1);
    base.saturating_mul(multiplier).min(max)
}

/// Outcome of [`with_retry`]: the final result plus how many calls were made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, StageFailure>,
    pub attempts: u32,
}

/// Call `op` until it succeeds, fails with a non-retryable kind, or the
/// policy runs out of retries.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StageFailure>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts,
                };
            }
            Err(failure) => {
                let retries_so_far = attempts - 1;
                if !policy.should_retry(&failure, retries_so_far) {
                    return Attempted {
                        result: Err(failure),
                        attempts,
                    };
                }

                let delay = policy.backoff(attempts);
                warn!(
                    call = label,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    kind = %failure.kind,
                    error = %failure.message,
                    "retrying after transient failure"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Bound `fut` by `limit`. An adapter error is converted into a
/// [`StageFailure`]; an elapsed timer becomes `on_elapsed()`.
pub async fn with_timeout<T, E, Fut>(
    limit: Duration,
    fut: Fut,
    on_elapsed: impl FnOnce() -> StageFailure,
) -> Result<T, StageFailure>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<StageFailure>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(on_elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use docmodern_shared::ErrorKind;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn test_calculate_backoff() {
        let base = Duration::from_millis(500);
        let max = Duration::from_millis(8_000);

        assert_eq!(calculate_backoff(0, base, max), Duration::ZERO);
        assert_eq!(calculate_backoff(1, base, max), Duration::from_millis(500));
        assert_eq!(calculate_backoff(2, base, max), Duration::from_millis(1_000));
        assert_eq!(calculate_backoff(3, base, max), Duration::from_millis(2_000));
        assert_eq!(calculate_backoff(5, base, max), Duration::from_millis(8_000));
        assert_eq!(calculate_backoff(40, base, max), Duration::from_millis(8_000));
    }

    #[test]
    fn should_retry_only_transient_kinds() {
        let policy = fast_policy(3);
        assert!(policy.should_retry(&StageFailure::network("reset"), 0));
        assert!(policy.should_retry(&StageFailure::new(ErrorKind::ServiceError, "503"), 2));
        assert!(!policy.should_retry(&StageFailure::new(ErrorKind::ServiceError, "503"), 3));
        assert!(!policy.should_retry(&StageFailure::parse("bad json"), 0));
        assert!(!policy.should_retry(&StageFailure::empty("blank"), 0));
        assert!(!policy.should_retry(&StageFailure::new(ErrorKind::Refusal, "no"), 0));
    }

    #[tokio::test]
    async fn with_retry_recovers_from_transient_failure() {
        let calls = AtomicU32::new(0);
        let outcome = with_retry(&fast_policy(3), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StageFailure::network("connection reset"))
                } else {
                    Ok("done")
                }
            }
        })
        .await;

        assert_eq!(outcome.result.unwrap(), "done");
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn with_retry_gives_up_after_limit() {
        let outcome: Attempted<()> = with_retry(&fast_policy(2), "test", || async {
            Err(StageFailure::new(ErrorKind::ServiceError, "RATE_LIMIT: slow down"))
        })
        .await;

        assert_eq!(outcome.result.unwrap_err().kind, ErrorKind::ServiceError);
        assert_eq!(outcome.attempts, 3);
    }

    #[tokio::test]
    async fn with_retry_surfaces_permanent_failure_immediately() {
        let outcome: Attempted<()> = with_retry(&fast_policy(5), "test", || async {
            Err(StageFailure::new(ErrorKind::HttpStatus, "HTTP 404"))
        })
        .await;

        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn with_timeout_maps_elapsed() {
        let result: Result<(), StageFailure> = with_timeout(
            Duration::from_millis(10),
            async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<(), StageFailure>(())
            },
            || StageFailure::network("timed out"),
        )
        .await;

        assert_eq!(result.unwrap_err().message, "timed out");
    }
}
