//! Error classification for retry decisions

/// Whether another attempt can change the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: lock contention, filesystem hiccups
    Retryable,

    /// Domain or data errors that fail the same way every time
    Permanent,
}

/// Trait for error classification
pub trait RetryClassifiable {
    fn classify(&self) -> ErrorClass;

    fn is_retryable(&self) -> bool {
        self.classify() == ErrorClass::Retryable
    }
}
