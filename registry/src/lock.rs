//! Cross-process lock around registry read-modify-write sequences.
//!
//! ## Design
//! - Advisory exclusive lock (fs2 / flock) on a companion file
//!   `<registry>.lock`, never on the registry itself: the registry is
//!   replaced by rename, which would orphan a lock held on the old inode.
//! - Acquisition polls `try_lock_exclusive` until a deadline so a stuck
//!   holder surfaces as [`RegistryError::LockTimeout`] instead of blocking
//!   the CI job forever.
//! - The guard releases on drop. The lock file itself is left in place;
//!   unlinking it would let a waiter lock a file nobody else can see.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{RegistryError, Result};

/// Exclusive, scoped mutual exclusion over a registry path.
///
/// The guard must release the lock when dropped, on every exit path.
pub trait ScopedLock {
    type Guard;

    fn acquire(&self) -> Result<Self::Guard>;
}

/// File-based advisory lock.
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    timeout: Duration,
    poll_interval: Duration,
}

impl FileLock {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Lock guarding the registry at `registry_path`.
    pub fn for_registry(registry_path: &Path) -> Self {
        Self::new(lock_path_for(registry_path))
    }

    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            timeout: Self::DEFAULT_TIMEOUT,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<File> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| RegistryError::LockAcquisition {
                path: self.path.clone(),
                source: e,
            })?;
        }

        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.path)
            .map_err(|e| RegistryError::LockAcquisition {
                path: self.path.clone(),
                source: e,
            })
    }
}

impl ScopedLock for FileLock {
    type Guard = FileLockGuard;

    fn acquire(&self) -> Result<FileLockGuard> {
        let file = self.open()?;
        let started = Instant::now();

        loop {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        waited_ms = started.elapsed().as_millis() as u64,
                        "registry lock acquired"
                    );
                    return Ok(FileLockGuard {
                        file,
                        path: self.path.clone(),
                    });
                }
                Err(e) if is_contended(&e) => {
                    let waited = started.elapsed();
                    if waited >= self.timeout {
                        return Err(RegistryError::LockTimeout {
                            path: self.path.clone(),
                            waited,
                        });
                    }
                    std::thread::sleep(self.poll_interval.min(self.timeout - waited));
                }
                Err(e) => {
                    return Err(RegistryError::LockAcquisition {
                        path: self.path.clone(),
                        source: e,
                    });
                }
            }
        }
    }
}

/// A held registry lock. Released when dropped.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            // Closing the descriptor releases the flock anyway
            tracing::warn!(path = %self.path.display(), "failed to unlock registry: {e}");
        } else {
            tracing::debug!(path = %self.path.display(), "registry lock released");
        }
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Get the lock file path for a registry: `<registry_path>.lock`.
pub fn lock_path_for(registry_path: &Path) -> PathBuf {
    let mut lock_path = registry_path.as_os_str().to_owned();
    lock_path.push(".lock");
    PathBuf::from(lock_path)
}
