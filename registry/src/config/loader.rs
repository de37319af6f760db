use crate::classify::ClientClassifier;
use crate::config::error::{ConfigError, Result};
use crate::model::{PortRange, RegistryState};
use crate::retry::RetryPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Environment name → inclusive port range.
    ///
    /// A configured table replaces the built-in set instead of merging
    /// with it.
    #[serde(
        default = "default_environments",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub environments: BTreeMap<String, PortRange>,

    /// Which environment a client lands in when none is given
    #[serde(default)]
    pub classification: ClassificationConfig,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub backup: BackupSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Clients deployed to production (e.g. `master`, `main`)
    #[serde(default = "default_primary_clients")]
    pub primary_clients: Vec<String>,

    /// Clients deployed to staging
    #[serde(default = "default_prerelease_clients")]
    pub prerelease_clients: Vec<String>,

    #[serde(default = "default_production_environment")]
    pub production_environment: String,

    #[serde(default = "default_staging_environment")]
    pub staging_environment: String,

    /// Everything else
    #[serde(default = "default_default_environment")]
    pub default_environment: String,
}

/// Retry configuration for registry operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts, including the first
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay between attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Random ±fraction applied to the delay (0.0-1.0)
    #[serde(default)]
    pub jitter_factor: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSettings {
    /// Give up waiting for the registry lock after this many milliseconds
    #[serde(default = "default_lock_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_lock_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSettings {
    /// Number of backups kept after each mutation
    #[serde(default = "default_backup_retention")]
    pub retention: usize,

    /// Backup directory (defaults to `<registry dir>/<stem>_backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_environments() -> BTreeMap<String, PortRange> {
    BTreeMap::from([
        ("development".to_string(), PortRange::new(5000, 5999)),
        ("staging".to_string(), PortRange::new(6000, 6999)),
        ("production".to_string(), PortRange::new(7000, 7999)),
    ])
}
fn default_primary_clients() -> Vec<String> {
    vec!["master".to_string()]
}
fn default_prerelease_clients() -> Vec<String> {
    vec!["staging".to_string()]
}
fn default_production_environment() -> String {
    "production".to_string()
}
fn default_staging_environment() -> String {
    "staging".to_string()
}
fn default_default_environment() -> String {
    "development".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_lock_timeout_ms() -> u64 {
    10_000
}
fn default_lock_poll_interval_ms() -> u64 {
    50
}
fn default_backup_retention() -> usize {
    5
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            primary_clients: default_primary_clients(),
            prerelease_clients: default_prerelease_clients(),
            production_environment: default_production_environment(),
            staging_environment: default_staging_environment(),
            default_environment: default_default_environment(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            jitter_factor: 0.0,
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_lock_timeout_ms(),
            poll_interval_ms: default_lock_poll_interval_ms(),
        }
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            retention: default_backup_retention(),
            dir: None,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environments: default_environments(),
            classification: ClassificationConfig::default(),
            retry: RetrySettings::default(),
            lock: LockSettings::default(),
            backup: BackupSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_retries as usize,
            retry_delay: Duration::from_millis(self.retry.retry_delay_ms),
            jitter_factor: self.retry.jitter_factor,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock.timeout_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lock.poll_interval_ms)
    }

    pub fn classifier(&self) -> ClientClassifier {
        ClientClassifier::from_config(&self.classification)
    }

    /// Empty registry document holding every configured environment.
    pub fn initial_state(&self) -> crate::Result<RegistryState> {
        RegistryState::with_environments(
            self.environments
                .iter()
                .map(|(name, range)| (name.clone(), *range)),
        )
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub const ENV_PREFIX: &'static str = "BRANCHPORT";

    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (BRANCHPORT_ prefix)
    pub fn load(&self) -> Result<AppConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults. Environments are left out so that a file's
        // table replaces them; serde fills them in when nothing else does.
        let mut defaults = AppConfig::default();
        defaults.environments.clear();
        let defaults_json = serde_json::to_string(&defaults)?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        // Layer 2: Config file (if provided)
        if let Some(ref path) = self.config_path {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading config file");
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment variables, double underscore for nesting
        // Example: BRANCHPORT_LOCK__TIMEOUT_MS=30000
        builder = builder.add_source(
            Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("classification.primary_clients")
                .with_list_parse_key("classification.prerelease_clients"),
        );

        let config = builder.build()?;
        let app_config: AppConfig = config.try_deserialize()?;

        crate::config::validator::validate_config(&app_config)?;

        Ok(app_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./branchport.toml
    /// 2. XDG config: ~/.config/branchport/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./branchport.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("branchport").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<AppConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
