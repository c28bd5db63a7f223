//! Bounded retries with exponential backoff.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::ApiError;

/// Exponential backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Base delay for first retry.
    pub base: Duration,

    /// Maximum delay.
    pub max: Duration,

    /// Jitter factor (0.0 to 1.0).
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl BackoffPolicy {
    /// Fixed interval, no growth and no jitter.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            base: interval,
            max: interval,
            jitter: 0.0,
        }
    }

    /// Calculate delay for the given attempt number (0-based).
    ///
    /// Never exceeds `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(32) as i32;
        let delay = self.base.as_millis() as f64 * 2.0_f64.powi(exp);
        let delay = delay.min(self.max.as_millis() as f64);

        let jitter = if self.jitter > 0.0 {
            delay * self.jitter * rand::rng().random_range(-1.0..=1.0)
        } else {
            0.0
        };
        let final_delay = (delay + jitter).clamp(0.0, self.max.as_millis() as f64);

        Duration::from_millis(final_delay as u64)
    }
}

/// Retry budget for transient API errors.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffPolicy {
                base: Duration::from_secs(2),
                max: Duration::from_secs(30),
                jitter: 0.25,
            },
        }
    }
}

/// Default retries for transient errors. With the default backoff this
/// spans roughly two minutes, long enough for IAM role propagation.
pub const DEFAULT_MAX_RETRIES: u32 = 6;

/// Why a retried call finally failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailure {
    /// Every attempt failed with a transient error.
    Exhausted { attempts: u32, last: ApiError },

    /// A non-transient error ended the loop.
    Fatal(ApiError),
}

impl RetryPolicy {
    /// Run `call` until it succeeds, fails with a non-transient error, or
    /// the retry budget is spent.
    pub async fn run<T, F, Fut, P>(
        &self,
        operation: &str,
        is_transient: P,
        mut call: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
        P: Fn(&ApiError) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) => {
                    if attempt >= self.max_retries {
                        return Err(RetryFailure::Exhausted {
                            attempts: attempt + 1,
                            last: err,
                        });
                    }
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Transient API error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!(operation, error = %err, "API call failed");
                    return Err(RetryFailure::Fatal(err));
                }
            }
        }
    }
}
