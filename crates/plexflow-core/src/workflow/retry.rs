//! Retry decisions and backoff schedule for durable executors.
//!
//! The engines never retry. Executors consult `RetryHandler` between attempts
//! of a single activity call.

use std::time::Duration;

use plexflow_types::config::RetryPolicy;

use super::durable::ActivityError;

// ---------------------------------------------------------------------------
// RetryHandler
// ---------------------------------------------------------------------------

/// Stateless retry handler; all inputs come from the caller.
pub struct RetryHandler;

impl RetryHandler {
    /// Whether another attempt should follow a failed one.
    ///
    /// `attempt` is 1-based (first execution is attempt 1). Non-retryable
    /// errors stop immediately regardless of the remaining budget.
    pub fn should_retry(policy: &RetryPolicy, attempt: u32, error: &ActivityError) -> bool {
        error.is_retryable() && attempt < policy.max_attempts
    }

    /// Delay before the attempt following `attempt`.
    ///
    /// `initial_backoff_ms * multiplier^(attempt - 1)`, capped at
    /// `max_backoff_ms`.
    pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let multiplier = policy.backoff_multiplier.max(1.0);
        let raw = policy.initial_backoff_ms as f64 * multiplier.powi(exponent);
        let capped = raw.min(policy.max_backoff_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
