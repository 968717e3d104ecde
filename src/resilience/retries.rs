//! Retry policy.
//!
//! # Responsibilities
//! - Decide whether a failed backend call is worth another attempt
//! - Produce the delay before the next attempt
//!
//! # Design Decisions
//! - Timeouts and connection errors are always retryable
//! - 5xx retryable when configured; 4xx, malformed replies and
//!   too-large rejections never are
//! - The breaker is consulted by the caller between attempts, not here

use std::time::Duration;

use crate::config::RetryConfig;
use crate::dispatch::client::BackendCallError;
use crate::resilience::backoff::calculate_backoff;

/// Retry settings shared by the real-time dispatcher and batch resubmission.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub multiplier: u64,
    pub max_delay_ms: u64,
    pub retry_on_server_error: bool,
    pub resubmit_batches: bool,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            multiplier: config.multiplier,
            max_delay_ms: config.max_delay_ms,
            retry_on_server_error: config.retry_on_server_error,
            resubmit_batches: config.resubmit_batches,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Whether this failure may be retried at all.
    pub fn is_retryable(&self, error: &BackendCallError) -> bool {
        match error {
            BackendCallError::Timeout | BackendCallError::Transport(_) => true,
            BackendCallError::Status { status, .. } => {
                self.retry_on_server_error && (500..600).contains(status)
            }
            BackendCallError::PayloadTooLarge | BackendCallError::Malformed(_) => false,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        calculate_backoff(attempt, self.base_delay_ms, self.multiplier, self.max_delay_ms)
    }
}
