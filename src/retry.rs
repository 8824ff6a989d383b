//! Bounded exponential-backoff retry for remote calls.
//!
//! Every request to the OCR service goes through [`RetryPolicy::execute`].
//! The policy is an explicit value rather than a wrapper baked into each
//! call site: the operation, the retry budget and the predicate deciding
//! which errors deserve another attempt are all parameters.
//!
//! This is the *inner* retry tier. Whole-chunk re-attempts in
//! [`crate::chunked`] form a separate, slower, linear tier on top.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Ceiling for any single backoff sleep.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(300);

/// Retry budget and backoff curve for one remote operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Sleep before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every retry.
    /// Values below 1.0 (or not finite) act as 1.0.
    pub backoff_factor: f64,
    /// Upper bound on a single sleep, however large the curve grows.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor: sanitize_factor(backoff_factor),
            max_delay: DEFAULT_MAX_DELAY,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay slept before retry number `retry` (0-based):
    /// `initial_delay × backoff_factor^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = sanitize_factor(self.backoff_factor).powi(i32::try_from(retry).unwrap_or(i32::MAX));
        self.clamp(self.initial_delay.as_secs_f64() * factor)
    }

    /// Seconds to a `Duration`, saturating at `max_delay` on overflow.
    fn clamp(&self, secs: f64) -> Duration {
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Run `operation` until it succeeds, returns an error `is_retryable`
    /// rejects, or the budget is spent.
    ///
    /// On exhaustion the last error is returned unchanged so callers can
    /// still inspect its kind.
    pub async fn execute<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut operation: F,
        is_retryable: P,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let mut delay = self.initial_delay.min(self.max_delay);
        let mut attempt: u32 = 0;

        loop {
            if attempt > 0 {
                debug!("{}: retry {}/{}", label, attempt, self.max_retries);
            }

            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !is_retryable(&err) {
                debug!("{}: non-retryable error, giving up: {}", label, err);
                return Err(err);
            }

            if attempt >= self.max_retries {
                warn!(
                    "{}: giving up after {} retries: {}",
                    label, self.max_retries, err
                );
                return Err(err);
            }

            attempt += 1;
            warn!(
                "{}: attempt {} failed ({}); retry {}/{} in {:.1}s",
                label,
                attempt,
                err,
                attempt,
                self.max_retries,
                delay.as_secs_f64()
            );
            sleep(delay).await;
            delay = self.clamp(delay.as_secs_f64() * sanitize_factor(self.backoff_factor));
        }
    }
}

fn sanitize_factor(factor: f64) -> f64 {
    if factor.is_finite() && factor >= 1.0 {
        factor
    } else {
        1.0
    }
}
