/// Configuration for the port registry
///
/// Layered configuration:
/// 1. Defaults (from code)
/// 2. Config file (branchport.toml)
/// 3. Environment variables (BRANCHPORT_* prefix)
///
/// # Example
///
/// ```no_run
/// use branchport_registry::config::ConfigLoader;
///
/// // Load from default locations
/// let config = ConfigLoader::load_default()?;
///
/// // Or load from a specific file
/// let config = ConfigLoader::new().with_file("./ci/branchport.toml").load()?;
/// # Ok::<(), branchport_registry::config::ConfigError>(())
/// ```
pub mod error;
pub mod loader;
pub mod validator;

pub use error::{ConfigError, Result};
pub use loader::{
    AppConfig, BackupSettings, ClassificationConfig, ConfigLoader, LockSettings, RetrySettings,
};
pub use validator::validate_config;
