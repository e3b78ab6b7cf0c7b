use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::error::GlmError;

/// Bounded exponential backoff for one idempotent remote call.
///
/// The delay after failed attempt `n` is `multiplier * 2^(n-1)`, clamped to
/// `[min_delay, max_delay]`. The policy knows nothing about the operation it
/// wraps; callers decide which errors are worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub multiplier: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            multiplier: Duration::from_secs(1),
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            multiplier: Duration::ZERO,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.multiplier
            .saturating_mul(factor)
            .clamp(self.min_delay, self.max_delay)
    }

    /// Calls `op` with the 1-based attempt number until it succeeds, fails
    /// with an error `is_retryable` rejects, or `max_attempts` calls were
    /// made. Only the last case wraps the error in `RetriesExhausted`.
    pub fn run<T, F, R>(&self, operation: &str, is_retryable: R, mut op: F) -> Result<T, GlmError>
    where
        F: FnMut(u32) -> Result<T, GlmError>,
        R: Fn(&GlmError) -> bool,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if !is_retryable(&err) => return Err(err),
                Err(err) if attempt >= max_attempts => {
                    return Err(GlmError::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(err),
                    });
                }
                Err(err) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}
