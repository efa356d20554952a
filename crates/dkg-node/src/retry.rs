//! Bounded retry with exponential backoff
//!
//! [`RetryPolicy`] is a plain value: the delay schedule is a pure function
//! of the attempt number, and [`RetryPolicy::run`] composes it around any
//! fallible async call with a caller-supplied retryability predicate.
//!
//! Attempt `0` is the first call. After a retryable failure on attempt `k`
//! (while `k < max_retries`) the policy waits `base_delay * backoff^k` and
//! calls again, so at most `max_retries + 1` calls are made.

use std::future::Future;
use std::time::Duration;

/// Retry bounds and backoff schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub backoff: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(1),
            backoff: 2.0,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration, backoff: f64) -> Self {
        Self {
            max_retries,
            base_delay,
            backoff,
        }
    }

    /// Wait after a retryable failure on `attempt`
    ///
    /// Saturates at `Duration::MAX`; a non-finite or negative factor yields zero.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff.powi(exponent);
        if secs.is_nan() || secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// Full wait schedule, one entry per possible retry
    #[must_use]
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|a| self.delay_for(a)).collect()
    }

    /// Run `op` until it succeeds, fails non-retryably, or retries run out
    ///
    /// `op` receives the attempt number. The last error is returned when the
    /// policy gives up.
    ///
    /// # Errors
    /// Whatever `op` last returned
    pub async fn run<T, E, F, Fut, P>(&self, is_retryable: P, mut op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < self.max_retries && is_retryable(&err) => {
                    tokio::time::sleep(self.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
