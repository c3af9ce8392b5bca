//! Bounded retry with exponential backoff and jitter
//!
//! Shared by every phase operation of a session, by sort navigation and by
//! the text analysis batches. Callers decide which failures are worth
//! another attempt; the helper only sequences attempts and delays.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Attempt budget and delay curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_factor: f64,
    pub jitter_enabled: bool,
}

impl RetryPolicy {
    pub const fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        exponential_factor: f64,
        jitter_enabled: bool,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            exponential_factor,
            jitter_enabled,
        }
    }

    /// Policy that never waits, for tests and offline runs
    pub const fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, 0, 0, 1.0, false)
    }

    pub const fn should_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    ///
    /// `base * factor^(attempt-1)`, capped at `max_delay_ms`, with up to ±25% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(self.base_delay_ms);
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let exponential_delay = (self.base_delay_ms as f64) * self.exponential_factor.powi(exponent);
        let mut delay = (exponential_delay as u64).min(self.max_delay_ms);
        if self.jitter_enabled && delay > 0 {
            let jitter_range = (delay as f64 * 0.25) as u64;
            let jitter = fastrand::u64(0..=jitter_range * 2);
            delay = (delay + jitter).saturating_sub(jitter_range);
        }
        Duration::from_millis(delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 8_000, 2.0, true)
    }
}

#[derive(Error, Debug)]
pub enum RetryFailure<E> {
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: E,
    },

    #[error("{operation} failed with a non-retryable error on attempt {attempt}: {error}")]
    Aborted {
        operation: String,
        attempt: u32,
        error: E,
    },
}

impl<E> RetryFailure<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Aborted { error, .. } => error,
        }
    }

    pub const fn inner(&self) -> &E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Aborted { error, .. } => error,
        }
    }

    pub const fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's attempt budget is spent. `op` receives the 1-based attempt number.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    mut should_retry: impl FnMut(&E) -> bool,
    mut op: F,
) -> Result<T, RetryFailure<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!("✅ {} succeeded on attempt {}/{}", operation, attempt, max_attempts);
                }
                return Ok(value);
            }
            Err(error) => {
                if !should_retry(&error) {
                    debug!("❌ {} failed with non-retryable error: {}", operation, error);
                    return Err(RetryFailure::Aborted {
                        operation: operation.to_string(),
                        attempt,
                        error,
                    });
                }
                if attempt >= max_attempts {
                    warn!("❌ {} exhausted {} attempts: {}", operation, max_attempts, error);
                    return Err(RetryFailure::Exhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        last_error: error,
                    });
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    "🔄 {} attempt {}/{} failed: {} (retrying in {:?})",
                    operation, attempt, max_attempts, error, delay
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy::new(5, 100, 1_000, 2.0, false);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::new(5, 1_000, 10_000, 2.0, true);
        for _ in 0..100 {
            let delay = policy.delay_for(1).as_millis();
            assert!((750..=1_250).contains(&delay), "delay {delay} out of range");
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<u32, RetryFailure<String>> = retry_with_backoff(
            &RetryPolicy::immediate(3),
            "flaky",
            |_| true,
            |attempt| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 3 { Err(format!("fail {attempt}")) } else { Ok(attempt) }
                }
            },
        )
        .await;

        assert_eq!(assert_ok!(result), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::immediate(2),
            "always failing",
            |_: &String| true,
            |attempt| async move { Err(format!("boom {attempt}")) },
        )
        .await;

        let failure = assert_err!(result);
        assert_eq!(failure.attempts(), 2);
        assert_eq!(failure.into_inner(), "boom 2");
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let result: Result<(), _> = retry_with_backoff(
            &RetryPolicy::immediate(5),
            "fatal",
            |e: &String| !e.contains("fatal"),
            |_| async { Err("fatal input".to_string()) },
        )
        .await;

        assert!(matches!(result, Err(RetryFailure::Aborted { attempt: 1, .. })));
    }
}
