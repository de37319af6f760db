//! Branch port registry
//!
//! Allocates ports to CI branches out of per-environment ranges. Every
//! caller is a separate process, so the only shared state is one JSON file:
//!
//! - reads and writes happen under an advisory file lock ([`lock`])
//! - writes replace the file atomically and are preceded by a timestamped
//!   backup with bounded retention ([`persist`], [`backup`])
//! - each operation runs inside a bounded retry loop that only retries
//!   transient failures ([`retry`])
//!
//! ```no_run
//! use branchport_registry::Registry;
//! use branchport_registry::config::AppConfig;
//!
//! let registry = Registry::open("ports.json", &AppConfig::default())?;
//! let port = registry.assign("feature-login", "development")?;
//! println!("APP_PORT={port}");
//! # Ok::<(), branchport_registry::RegistryError>(())
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod allocation;
pub mod backup;
pub mod classify;
pub mod config;
pub mod error;
pub mod lock;
pub mod model;
pub mod persist;
pub mod registry;
pub mod retry;

pub use classify::ClientClassifier;
pub use error::{RegistryError, Result};
pub use lock::{FileLock, ScopedLock};
pub use model::{EnvironmentState, PortRange, RegistryState};
pub use registry::Registry;

/// Default registry filename, relative to the working directory.
pub const DEFAULT_REGISTRY_FILENAME: &str = "ports.json";

/// Environment variable consulted by the CLI for the registry path.
pub const REGISTRY_PATH_ENV: &str = "BRANCHPORT_REGISTRY";
