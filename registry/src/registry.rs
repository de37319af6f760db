//! The registry handle callers use.
//!
//! Every public operation is one transaction:
//!
//! ```text
//! retry { lock → load (or create) → compute → backup → persist → unlock }
//! ```
//!
//! Nothing is cached between operations; the file is the only shared state.

use std::io;
use std::path::{Path, PathBuf};

use crate::allocation::{self, Change};
use crate::backup::BackupManager;
use crate::classify::ClientClassifier;
use crate::config::AppConfig;
use crate::error::{RegistryError, Result};
use crate::lock::{FileLock, ScopedLock};
use crate::model::RegistryState;
use crate::persist;
use crate::retry::{RetryError, RetryPolicy, execute_with_retry};

/// Port registry backed by one JSON file.
#[derive(Debug)]
pub struct Registry<L: ScopedLock = FileLock> {
    path: PathBuf,
    lock: L,
    backups: BackupManager,
    retry: RetryPolicy,
    classifier: ClientClassifier,
    /// Document written when the file does not exist yet
    initial: RegistryState,
}

impl Registry<FileLock> {
    /// Registry at `path`, locked through `<path>.lock`.
    pub fn open(path: impl AsRef<Path>, config: &AppConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock = FileLock::for_registry(&path)
            .with_timeout(config.lock_timeout())
            .with_poll_interval(config.lock_poll_interval());
        Self::with_lock(path, lock, config)
    }
}

impl<L: ScopedLock> Registry<L> {
    pub fn with_lock(path: PathBuf, lock: L, config: &AppConfig) -> Result<Self> {
        let backups =
            BackupManager::for_registry(&path, config.backup.dir.as_deref(), config.backup.retention);
        Ok(Self {
            initial: config.initial_state()?,
            backups,
            retry: config.retry_policy(),
            classifier: config.classifier(),
            lock,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Environment a client deploys to when the caller names none.
    pub fn environment_for(&self, client_id: &str) -> &str {
        self.classifier.environment_for(client_id)
    }

    /// Create the registry file from configuration if it is missing.
    ///
    /// Returns whether this call created it. Concurrent callers race on a
    /// no-clobber write; exactly one wins.
    pub fn ensure_store_exists(&self) -> Result<bool> {
        self.with_retry(|| {
            let _guard = self.lock.acquire()?;
            self.create_if_missing()
        })
    }

    /// Port held by `client_id` in `environment`, assigning the lowest free
    /// one if it holds none.
    pub fn assign(&self, client_id: &str, environment: &str) -> Result<u16> {
        self.mutate(|state| allocation::assign(state, client_id, environment))
    }

    /// Drop the assignment, if any. Returns the port that was released.
    pub fn release(&self, client_id: &str, environment: &str) -> Result<Option<u16>> {
        self.mutate(|state| allocation::release(state, client_id, environment))
    }

    /// Move `client_id` from `from_env` to `to_env` under a single lock
    /// hold. On failure the registry file is left as it was.
    pub fn migrate(&self, client_id: &str, from_env: &str, to_env: &str) -> Result<u16> {
        self.mutate(|state| allocation::migrate(state, client_id, from_env, to_env))
    }

    pub fn lookup(&self, client_id: &str, environment: &str) -> Result<Option<u16>> {
        self.read(|state| Ok(state.environment(environment)?.port_of(client_id)))
    }

    /// Consistent copy of the whole document.
    pub fn snapshot(&self) -> Result<RegistryState> {
        self.read(|state| Ok(state.clone()))
    }

    fn read<T>(&self, mut f: impl FnMut(&RegistryState) -> Result<T>) -> Result<T> {
        self.with_retry(|| {
            let _guard = self.lock.acquire()?;
            let state = self.load_locked()?;
            f(&state)
        })
    }

    fn mutate<T>(&self, mut f: impl FnMut(&mut RegistryState) -> Result<Change<T>>) -> Result<T> {
        self.with_retry(|| {
            let _guard = self.lock.acquire()?;
            let mut state = self.load_locked()?;
            let change = f(&mut state)?;
            if change.changed {
                self.backups.backup(&self.path)?;
                persist::save_registry(&self.path, &state)?;
            }
            Ok(change.value)
        })
    }

    /// Caller holds the lock.
    fn load_locked(&self) -> Result<RegistryState> {
        self.create_if_missing()?;
        persist::load_registry(&self.path)
    }

    /// Caller holds the lock.
    fn create_if_missing(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        let bytes = persist::to_bytes(&self.initial)?;
        match persist::atomic_write_new(&self.path, &bytes) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "created registry");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(source) => Err(RegistryError::Persistence {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn with_retry<T>(&self, operation: impl FnMut() -> Result<T>) -> Result<T> {
        execute_with_retry(operation, &self.retry).map_err(|err| match err {
            RetryError::Permanent(err) => err,
            RetryError::MaxAttemptsExceeded { attempts, last } => {
                RegistryError::RetriesExhausted {
                    attempts,
                    source: Box::new(last),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortRange;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Times out the first `failures` acquisitions.
    struct FlakyLock {
        failures: Cell<usize>,
        attempts: Cell<usize>,
    }

    impl FlakyLock {
        fn failing(failures: usize) -> Self {
            Self {
                failures: Cell::new(failures),
                attempts: Cell::new(0),
            }
        }
    }

    impl ScopedLock for FlakyLock {
        type Guard = ();

        fn acquire(&self) -> Result<()> {
            self.attempts.set(self.attempts.get() + 1);
            if self.failures.get() > 0 {
                self.failures.set(self.failures.get() - 1);
                return Err(RegistryError::LockTimeout {
                    path: PathBuf::from("ports.json.lock"),
                    waited: Duration::ZERO,
                });
            }
            Ok(())
        }
    }

    fn config() -> AppConfig {
        let mut config = AppConfig::default();
        config.retry.retry_delay_ms = 0;
        config
            .environments
            .insert("development".to_string(), PortRange::new(5000, 5002));
        config
    }

    #[test]
    fn transient_lock_failure_is_retried() {
        let dir = TempDir::new().unwrap();
        let registry =
            Registry::with_lock(dir.path().join("ports.json"), FlakyLock::failing(2), &config())
                .unwrap();

        assert_eq!(registry.assign("b1", "development").unwrap(), 5000);
        assert_eq!(registry.lock.attempts.get(), 3);
    }

    #[test]
    fn retries_exhausted_carries_last_cause() {
        let dir = TempDir::new().unwrap();
        let registry =
            Registry::with_lock(dir.path().join("ports.json"), FlakyLock::failing(10), &config())
                .unwrap();

        let err = registry.assign("b1", "development").unwrap_err();
        assert!(matches!(
            err,
            RegistryError::RetriesExhausted { attempts: 3, .. }
        ));
        assert!(matches!(err.root_cause(), RegistryError::LockTimeout { .. }));
        assert!(!dir.path().join("ports.json").exists());
    }

    #[test]
    fn permanent_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let registry =
            Registry::with_lock(dir.path().join("ports.json"), FlakyLock::failing(0), &config())
                .unwrap();

        let err = registry.assign("b1", "qa").unwrap_err();
        assert!(matches!(err, RegistryError::EnvironmentNotFound(_)));
        assert_eq!(registry.lock.attempts.get(), 1);
    }

    #[test]
    fn no_op_operations_do_not_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        let registry = Registry::open(&path, &config()).unwrap();

        registry.assign("b1", "development").unwrap();
        let before = std::fs::read(&path).unwrap();
        let backups = registry.backups().list().unwrap().len();

        registry.assign("b1", "development").unwrap();
        assert_eq!(registry.release("ghost", "development").unwrap(), None);

        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(registry.backups().list().unwrap().len(), backups);
    }

    #[test]
    fn ensure_store_exists_creates_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        let registry = Registry::open(&path, &config()).unwrap();

        assert!(registry.ensure_store_exists().unwrap());
        assert!(!registry.ensure_store_exists().unwrap());

        let state = persist::load_registry(&path).unwrap();
        assert_eq!(state, config().initial_state().unwrap());
    }

    #[test]
    fn corrupted_store_fails_without_retry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        std::fs::write(&path, "not json").unwrap();
        let registry = Registry::with_lock(path.clone(), FlakyLock::failing(0), &config()).unwrap();

        assert!(matches!(
            registry.assign("b1", "development"),
            Err(RegistryError::Corrupted { .. })
        ));
        assert_eq!(registry.lock.attempts.get(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "not json");
    }

    #[test]
    fn environment_for_uses_configured_classification() {
        let mut config = config();
        config.classification.primary_clients = vec!["main".to_string()];
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path().join("ports.json"), &config).unwrap();

        assert_eq!(registry.environment_for("main"), "production");
        assert_eq!(registry.environment_for("master"), "development");
    }

    #[test]
    fn lookup_and_snapshot() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::open(dir.path().join("ports.json"), &config()).unwrap();
        registry.assign("b1", "development").unwrap();
        registry.assign("s", "staging").unwrap();

        assert_eq!(registry.lookup("b1", "development").unwrap(), Some(5000));
        assert_eq!(registry.lookup("b1", "staging").unwrap(), None);
        assert!(matches!(
            registry.lookup("b1", "qa"),
            Err(RegistryError::EnvironmentNotFound(_))
        ));

        let all: Vec<_> = registry
            .snapshot()
            .unwrap()
            .assignments()
            .map(|(env, client, port)| (env.to_string(), client.to_string(), port))
            .collect();
        assert_eq!(
            all,
            vec![
                ("development".to_string(), "b1".to_string(), 5000),
                ("staging".to_string(), "s".to_string(), 6000),
            ]
        );
    }
}
