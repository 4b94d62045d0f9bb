//! Retry wrapper around whole pipeline invocations

use crate::constants::{DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_RETRIES, MIN_RETRY_BACKOFF};
use crate::error::TxError;
use crate::types::TxRes;
use std::future::Future;
use std::time::Duration;

/// Sleep schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// `initial`, then doubling after every failed attempt
    Exponential { initial: Duration },
    /// Same sleep every time
    Fixed(Duration),
}

impl Backoff {
    /// Sleep after the `attempt`-th failure (1-based), never below one second
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = match self {
            Backoff::Exponential { initial } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor)
            }
            Backoff::Fixed(delay) => *delay,
        };
        delay.max(MIN_RETRY_BACKOFF)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Exponential {
            initial: DEFAULT_INITIAL_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Backoff) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up
///
/// Attempts never overlap. The last error is returned as is.
pub async fn retry_tx<F, Fut>(policy: &RetryPolicy, mut attempt: F) -> Result<TxRes, TxError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<TxRes, TxError>>,
{
    if policy.max_retries == 0 {
        return Err(TxError::InvalidArgument(
            "max_retries must be at least 1".to_string(),
        ));
    }

    let max_retries = policy.max_retries;
    let mut current = 1;

    loop {
        match attempt().await {
            Ok(res) => return Ok(res.with_attempts(current)),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if current >= max_retries => {
                tracing::error!(attempt = current, max_retries, error = %e, "Transaction failed, giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.backoff.delay(current);
                tracing::warn!(
                    attempt = current,
                    max_retries,
                    error = %e,
                    ?delay,
                    "Transaction attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                current += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_exponential_schedule() {
        let backoff = Backoff::default();
        let delays: Vec<_> = (1..=4).map(|n| backoff.delay(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8]);

        assert_eq!(Backoff::Fixed(Duration::from_secs(5)).delay(3), Duration::from_secs(5));
        // caps the factor instead of overflowing the shift
        assert_eq!(backoff.delay(200), Duration::from_secs(u64::from(u32::MAX)));
    }

    #[test]
    fn test_delay_has_one_second_floor() {
        let zero = Backoff::Exponential {
            initial: Duration::ZERO,
        };
        assert_eq!(zero.delay(1), Duration::from_secs(1));
        assert_eq!(zero.delay(5), Duration::from_secs(1));
        assert_eq!(
            Backoff::Fixed(Duration::from_millis(100)).delay(2),
            Duration::from_secs(1)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_backoff_still_waits_between_attempts() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();
        let policy = RetryPolicy::new(
            3,
            Backoff::Exponential {
                initial: Duration::ZERO,
            },
        );

        let err = retry_tx(&policy, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TxError::Rpc("connection refused".into()))
        })
        .await
        .unwrap_err();

        assert!(matches!(err, TxError::Rpc(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_stops_at_max_retries() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let err = retry_tx(&RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TxError::DryRunRevert("ERC20: transfer amount exceeds balance".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(err, TxError::DryRunRevert(_)));
        // slept 1s + 2s between the three attempts
        assert_eq!(started.elapsed().as_secs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_one_failure() {
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let res = retry_tx(&RetryPolicy::default(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(TxError::Rpc("connection reset by peer".into()))
            } else {
                TxRes::new(None, None, None)
            }
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(res.attempts(), 2);
        assert_eq!(started.elapsed().as_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_programmer_error_not_retried() {
        let calls = AtomicU32::new(0);

        let err = retry_tx(&RetryPolicy::new(5, Backoff::default()), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(TxError::InvalidArgument("missing wallet".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, TxError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let policy = RetryPolicy::new(0, Backoff::default());
        let res = retry_tx(&policy, || async { TxRes::new(None, None, None) }).await;
        assert!(matches!(res, Err(TxError::InvalidArgument(_))));
    }
}
