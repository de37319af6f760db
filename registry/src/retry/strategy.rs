//! Bounded retry strategy
//!
//! Every attempt runs the whole operation again (lock, load, compute,
//! persist). Permanent errors short-circuit the loop.

use rand::Rng;
use std::time::Duration;

use super::RetryError;
use super::classifier::RetryClassifiable;

/// Retry policy
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: usize,
    /// Sleep between attempts
    pub retry_delay: Duration,
    /// Random ±fraction applied to `retry_delay` (0.0 disables jitter)
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            jitter_factor: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Policy that never sleeps between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            retry_delay: Duration::ZERO,
            jitter_factor: 0.0,
        }
    }
}

/// Execute `operation` until it succeeds, fails permanently, or the attempt
/// budget runs out.
///
/// - Permanent errors are returned as [`RetryError::Permanent`] after a
///   single attempt.
/// - Transient errors are retried up to `max_attempts` total attempts; the
///   last one is returned as [`RetryError::MaxAttemptsExceeded`].
pub fn execute_with_retry<F, T, E>(
    mut operation: F,
    policy: &RetryPolicy,
) -> std::result::Result<T, RetryError<E>>
where
    F: FnMut() -> std::result::Result<T, E>,
    E: std::error::Error + RetryClassifiable + 'static,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation() {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(attempt, "registry operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    return Err(RetryError::Permanent(err));
                }

                if attempt >= max_attempts {
                    tracing::warn!(attempts = attempt, error = %err, "retries exhausted");
                    return Err(RetryError::MaxAttemptsExceeded {
                        attempts: attempt,
                        last: err,
                    });
                }

                let delay = apply_jitter(policy.retry_delay, policy.jitter_factor);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient registry failure, retrying"
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            }
        }
    }
}

/// Apply jitter to a duration
///
/// Example: 1000ms with 0.25 jitter → 750ms to 1250ms
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }
    let mut rng = rand::rng();
    let jitter = rng.random_range(-jitter_factor..=jitter_factor);
    let jittered_ms = (duration.as_millis() as f64 * (1.0 + jitter)).max(0.0) as u64;
    Duration::from_millis(jittered_ms)
}
