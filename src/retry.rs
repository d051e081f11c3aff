//! Bounded retry for operations against the store
//!
//! Only transient failures are retried. Everything else propagates on the
//! first attempt.

use std::future::Future;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; never below 1
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Policy that makes exactly one attempt
    #[cfg(test)]
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay before attempt `attempt + 1`, doubling per attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << shift)
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the policy's attempts are used up. The last error is returned.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    op_name: &str,
    is_transient: impl Fn(&E) -> bool,
    mut operation: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(op = op_name, attempt, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if is_transient(&e) && attempt < max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    op = op_name,
                    attempt,
                    max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if is_transient(&e) {
                    tracing::error!(op = op_name, attempts = attempt, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}
