//! Error types for registry operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::retry::classifier::{ErrorClass, RetryClassifiable};

/// Registry result type alias
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Registry error taxonomy
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Environment '{0}' not found in registry")]
    EnvironmentNotFound(String),

    #[error("No available ports in {environment} environment ({start}-{end})")]
    RangeExhausted {
        environment: String,
        start: u16,
        end: u16,
    },

    #[error("Timed out after {waited:?} waiting for registry lock {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("Failed to acquire registry lock {path}: {source}")]
    LockAcquisition {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to persist registry {path}: {source}")]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to back up registry into {path}: {source}")]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read registry {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Registry {path} is corrupted: {source}")]
    Corrupted {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Registry {path} is invalid: {reason}")]
    InvalidDocument { path: PathBuf, reason: String },

    #[error("Failed to serialize registry: {source}")]
    Serialize { source: serde_json::Error },

    #[error("Invalid port range for {environment}: start {start} is greater than end {end}")]
    InvalidRange {
        environment: String,
        start: u16,
        end: u16,
    },

    #[error("Registry operation failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: usize,
        #[source]
        source: Box<RegistryError>,
    },
}

impl RegistryError {
    /// The innermost cause, looking through `RetriesExhausted`.
    pub fn root_cause(&self) -> &RegistryError {
        match self {
            RegistryError::RetriesExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl RetryClassifiable for RegistryError {
    fn classify(&self) -> ErrorClass {
        match self {
            // Lock contention is the expected transient case
            RegistryError::LockTimeout { .. } => ErrorClass::Retryable,
            RegistryError::LockAcquisition { source, .. }
            | RegistryError::Persistence { source, .. }
            | RegistryError::Backup { source, .. }
            | RegistryError::Read { source, .. } => classify_io_error(source),

            RegistryError::EnvironmentNotFound(_)
            | RegistryError::RangeExhausted { .. }
            | RegistryError::Corrupted { .. }
            | RegistryError::InvalidDocument { .. }
            | RegistryError::Serialize { .. }
            | RegistryError::InvalidRange { .. } => ErrorClass::Permanent,

            // Already aggregated; never retried again
            RegistryError::RetriesExhausted { .. } => ErrorClass::Permanent,
        }
    }
}

// Helper: Classify std::io::Error based on ErrorKind
fn classify_io_error(err: &std::io::Error) -> ErrorClass {
    match err.kind() {
        std::io::ErrorKind::PermissionDenied => ErrorClass::Permanent,
        // Everything else (interrupted, would-block, disk pressure, vanished
        // temp files) may clear up on the next attempt
        _ => ErrorClass::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn domain_errors_are_permanent() {
        let not_found = RegistryError::EnvironmentNotFound("qa".to_string());
        assert!(!not_found.is_retryable());

        let exhausted = RegistryError::RangeExhausted {
            environment: "development".to_string(),
            start: 5000,
            end: 5002,
        };
        assert!(!exhausted.is_retryable());
    }

    #[test]
    fn lock_and_io_errors_are_retryable() {
        let timeout = RegistryError::LockTimeout {
            path: PathBuf::from("ports.json.lock"),
            waited: Duration::from_millis(10),
        };
        assert!(timeout.is_retryable());

        let persist = RegistryError::Persistence {
            path: PathBuf::from("ports.json"),
            source: io::Error::other("disk full"),
        };
        assert!(persist.is_retryable());
    }

    #[test]
    fn permission_denied_is_not_retried() {
        let err = RegistryError::Persistence {
            path: PathBuf::from("ports.json"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn root_cause_unwraps_aggregate() {
        let err = RegistryError::RetriesExhausted {
            attempts: 3,
            source: Box::new(RegistryError::EnvironmentNotFound("qa".to_string())),
        };
        assert!(matches!(
            err.root_cause(),
            RegistryError::EnvironmentNotFound(name) if name == "qa"
        ));
        assert!(err.to_string().contains("after 3 attempts"));
    }
}
