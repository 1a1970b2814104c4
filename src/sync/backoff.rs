//! Exponential backoff as an explicit policy object, consumed by a generic
//! retry helper so the schedule is decoupled from what is being retried.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::SyncConfig;
use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: 2,
            cap: Duration::from_millis(config.backoff_cap_ms),
        }
    }

    /// Delay after the Nth failed attempt (1-based): base * multiplier^(n-1),
    /// capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.cap)
    }
}

/// Run `op` under the policy. Non-retryable errors fail immediately; the
/// last error is returned once the attempt ceiling is reached. The delay is
/// a scheduled sleep, so concurrent retries of other work are not held up.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    what: &str,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
{
    let mut attempt = 1u32;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if attempt >= policy.max_attempts {
                    warn!("{} failed after {} attempts: {}", what, attempt, e);
                    return Err(e);
                }

                let delay = policy.delay_after(attempt);
                warn!(
                    "{} attempt {}/{} failed ({}), retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = BackoffPolicy {
            max_attempts: 6,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            cap: Duration::from_secs(5),
        };

        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5)); // capped
        assert_eq!(policy.delay_after(5), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_honors_attempt_ceiling() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), SyncError> = retry_with_backoff(&policy, "test op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Unreachable("down".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_non_retryable() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let result: Result<(), SyncError> = retry_with_backoff(&policy, "test op", |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(SyncError::Unauthorized) }
        })
        .await;

        assert!(matches!(result, Err(SyncError::Unauthorized)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_midway() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);

        let result = retry_with_backoff(&policy, "test op", |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 2 {
                    Err(SyncError::Server("busy".into()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
