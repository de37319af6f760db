//! Retry logic for registry operations
//!
//! This module provides:
//! - Error classification (retryable vs permanent)
//! - A bounded attempt loop with a fixed delay and optional jitter
//! - A single aggregated failure carrying the last cause on exhaustion

pub mod classifier;
pub mod strategy;

pub use classifier::{ErrorClass, RetryClassifiable};
pub use strategy::{RetryPolicy, execute_with_retry};

/// Outcome of a retried operation that did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// The operation failed with an error that retrying cannot fix.
    #[error("Permanent error (not retryable): {0}")]
    Permanent(#[source] E),

    /// Every attempt failed with a transient error.
    #[error("Max retry attempts exceeded ({attempts}): {last}")]
    MaxAttemptsExceeded {
        attempts: usize,
        #[source]
        last: E,
    },
}
