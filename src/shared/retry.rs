//! Exponential backoff shared by the issue tracker and chat channels.
//!
//! Default schedule: 2s, 4s, 8s (three retries after the first attempt).

use crate::shared::clock::Clock;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Error classes that know whether another attempt can help
pub trait Retryable {
    fn is_retryable(&self) -> bool;

    /// Explicit wait requested by the remote API, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub multiplier: u32,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(2),
            multiplier: 2,
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry_index` (zero-based)
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        let factor = self.multiplier.saturating_pow(retry_index);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Delay to apply for a failure, honouring a longer server-requested wait
    pub fn delay_with_hint(&self, retry_index: u32, retry_after: Option<Duration>) -> Duration {
        let backoff = self.delay_for(retry_index);
        match retry_after {
            Some(hint) if hint > backoff => hint,
            _ => backoff,
        }
    }

    /// Full backoff schedule, e.g. `[2s, 4s, 8s]`
    pub fn schedule(&self) -> Vec<Duration> {
        (0..self.max_retries).map(|i| self.delay_for(i)).collect()
    }

    /// Upper bound on time spent waiting between attempts
    pub fn total_retry_time(&self) -> Duration {
        self.schedule().iter().sum()
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent.
pub async fn run_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    clock: &dyn Clock,
    operation: &str,
    mut attempt: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let mut retries = 0;
    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && retries < policy.max_retries => {
                let delay = policy.delay_with_hint(retries, err.retry_after());
                retries += 1;
                warn!(
                    operation,
                    attempt = retries,
                    max_retries = policy.max_retries,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "Retryable failure, backing off"
                );
                clock.sleep(delay).await;
            }
            Err(err) => {
                if err.is_retryable() {
                    error!(operation, retries, error = %err, "Retry budget exhausted");
                }
                return Err(err);
            }
        }
    }
}
