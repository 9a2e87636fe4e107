//! Retry logic.
//!
//! # Responsibilities
//! - Retry gateway calls that failed for transient reasons
//! - Space attempts with exponential backoff + jitter
//!
//! # Design Decisions
//! - Only `GatewayError::Unreachable` is retried; rejections are final
//! - Attempt count includes the first call

use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::gateway::{GatewayError, GatewayResult};
use crate::resilience::backoff::calculate_backoff;

/// Bounded retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.max_delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

/// Run `call` until it succeeds, fails definitively, or attempts run out.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    operation,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(operation, attempts = attempt, error = %e, "Retries exhausted");
                }
                return Err(e);
            }
        }
    }
}

/// Whether `error` would be retried by [`retry_transient`].
pub fn is_retryable(error: &GatewayError) -> bool {
    error.is_transient()
}
