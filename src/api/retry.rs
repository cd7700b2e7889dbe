//! Backoff for transient events API failures.
//!
//! A call is attempted once, then retried after each delay yielded by
//! [`Backoff`] for as long as it keeps failing with a transient error.
//! Permanent and cancellation errors end the attempts immediately. When the
//! delays run out, the last error is returned with the attempt count
//! appended to its message.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::error::ApiError;

/// Limits for retrying one API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,

    /// Delay before the first retry. Each later delay doubles.
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl RetryConfig {
    /// Retries transient failures until cancelled, in practice. Waits start
    /// at 1s, double, and settle at 30s.
    pub const DEFAULT: Self = Self {
        max_retries: 1_000_000,
        initial_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(30),
    };

    /// A config that makes exactly one attempt.
    pub const NONE: Self = Self {
        max_retries: 0,
        initial_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
    };

    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// The delays to wait between attempts, in order.
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_delay.min(self.max_delay),
            max: self.max_delay,
            remaining: self.max_retries,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Doubling delays, capped, for a fixed number of retries.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    max: Duration,
    remaining: u32,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.max);
        Some(delay)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Backoff {}

/// Calls `operation` until it succeeds, fails permanently, or the backoff is
/// exhausted.
///
/// Cancellation is the caller's concern: dropping the returned future stops
/// both in-flight attempts and pending sleeps.
pub async fn retry_with_backoff<T, F, Fut>(
    config: RetryConfig,
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut delays = config.backoff();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let mut err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.kind.is_retriable() {
            return Err(err);
        }

        let Some(delay) = delays.next() else {
            if attempts > 1 {
                err.message = format!("{} (after {} attempts)", err.message, attempts);
            }
            return Err(err);
        };

        warn!(
            error = %err,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Transient events API error, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting<T: Send + 'static>(
        outcomes: impl Fn(u32) -> Result<T, ApiError> + Send + Sync + 'static,
    ) -> (Arc<AtomicU32>, impl FnMut() -> std::future::Ready<Result<T, ApiError>>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(outcomes(n))
        };
        (calls, op)
    }

    #[test]
    fn default_backoff_doubles_then_caps() {
        let delays: Vec<u64> = RetryConfig::DEFAULT
            .backoff()
            .take(8)
            .map(|d| d.as_secs())
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30, 30]);
        assert_eq!(RetryConfig::DEFAULT.backoff().len(), 1_000_000);
    }

    #[test]
    fn backoff_is_capped() {
        let config = RetryConfig::new(4, Duration::from_secs(10), Duration::from_secs(25));
        let delays: Vec<u64> = config.backoff().map(|d| d.as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 25, 25]);
    }

    #[test]
    fn none_yields_no_delays() {
        assert_eq!(RetryConfig::NONE.backoff().count(), 0);
    }

    #[tokio::test]
    async fn first_success_is_returned() {
        let (calls, op) = counting(|_| Ok(7));
        assert_eq!(retry_with_backoff(RetryConfig::DEFAULT, op).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let (calls, op) = counting::<()>(|_| Err(ApiError::from_status(404, "gone")));
        let err = retry_with_backoff(RetryConfig::DEFAULT, op).await.unwrap_err();
        assert_eq!(err.status_code, Some(404));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_is_not_retried() {
        let (calls, op) = counting::<()>(|_| Err(ApiError::cancelled()));
        let err = retry_with_backoff(RetryConfig::DEFAULT, op).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let (calls, op) = counting(|n| {
            if n < 2 {
                Err(ApiError::from_status(429, "slow down"))
            } else {
                Ok("done")
            }
        });
        let start = tokio::time::Instant::now();

        let value = retry_with_backoff(RetryConfig::DEFAULT, op).await.unwrap();

        assert_eq!(value, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // Waited 1s then 2s.
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn default_outlasts_a_long_outage() {
        // Forty failures span well over fifteen minutes of backoff.
        let (calls, op) = counting(|n| {
            if n < 40 {
                Err(ApiError::transient_without_source("connection refused"))
            } else {
                Ok(n)
            }
        });
        let start = tokio::time::Instant::now();

        let value = retry_with_backoff(RetryConfig::DEFAULT, op).await.unwrap();

        assert_eq!(value, 40);
        assert_eq!(calls.load(Ordering::SeqCst), 41);
        assert!(start.elapsed() >= Duration::from_secs(15 * 60));
    }

    #[tokio::test]
    async fn exhausted_retries_report_attempts() {
        let config = RetryConfig::new(2, Duration::from_millis(1), Duration::from_millis(2));
        let (calls, op) = counting::<()>(|_| Err(ApiError::transient_without_source("flaky")));

        let err = retry_with_backoff(config, op).await.unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.message, "flaky (after 3 attempts)");
    }

    #[tokio::test]
    async fn single_attempt_message_is_untouched() {
        let (calls, op) = counting::<()>(|_| Err(ApiError::transient_without_source("down")));
        let err = retry_with_backoff(RetryConfig::NONE, op).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(err.message, "down");
    }

    proptest! {
        #[test]
        fn delays_are_monotonic_and_bounded(
            retries in 0u32..12,
            initial_ms in 0u64..5_000,
            max_ms in 0u64..60_000,
        ) {
            let config = RetryConfig::new(
                retries,
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
            );
            let delays: Vec<_> = config.backoff().collect();

            prop_assert_eq!(delays.len(), retries as usize);
            for pair in delays.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
            for delay in &delays {
                prop_assert!(*delay <= Duration::from_millis(max_ms));
            }
        }
    }
}
