//! Opt-in retries for step handlers.
//!
//! The scheduler never retries a step. A handler that wants another attempt
//! at a collaborator call wraps it in a `RetryPolicy`; whatever it writes must
//! be idempotent across attempts.

use std::future::Future;

use super::error::FlowError;

/// Re-run a fallible operation up to `max_attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Whether to try again after `attempt` (1-based) failed with `error`.
    ///
    /// Cancellation and engine-level errors are never retried.
    pub fn should_retry(&self, attempt: u32, error: &FlowError) -> bool {
        attempt < self.max_attempts && error.is_retryable()
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempts are used up. The closure receives the 1-based attempt
    /// number. The last error is returned.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, FlowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, FlowError>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(attempt, &err) => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "attempt failed, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
