//! Timestamped registry backups with bounded retention.
//!
//! Backups live in one directory and are named
//! `<stem>-<YYYYMMDDTHHMMSS.ffffffZ>.json`, so name order is time order.
//! Only the mutation holding the registry lock touches this directory.

use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::{RegistryError, Result};
use crate::persist;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

#[derive(Debug, Clone)]
pub struct BackupManager {
    dir: PathBuf,
    stem: String,
    retention: usize,
}

impl BackupManager {
    pub const DEFAULT_RETENTION: usize = 5;

    /// Backups for `registry_path`, kept in `<dir>/<stem>_backups/` unless
    /// `dir` overrides it.
    pub fn for_registry(registry_path: &Path, dir: Option<&Path>, retention: usize) -> Self {
        let stem = registry_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "registry".to_string());
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => registry_path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join(format!("{stem}_backups")),
        };
        Self {
            dir,
            stem,
            retention,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `canonical` into the backup directory and prune old copies.
    ///
    /// Returns `None` when there is nothing to back up yet.
    pub fn backup(&self, canonical: &Path) -> Result<Option<PathBuf>> {
        let bytes = match std::fs::read(canonical) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(RegistryError::Backup {
                    path: canonical.to_path_buf(),
                    source,
                });
            }
        };

        // A retried operation sees the same pre-image again; one copy is enough
        if let Some(newest) = self.list()?.pop()
            && std::fs::read(&newest).is_ok_and(|existing| existing == bytes)
        {
            tracing::debug!(backup = %newest.display(), "pre-image already backed up");
            return Ok(Some(newest));
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| self.error(source))?;

        let stamp = Utc::now().format(TIMESTAMP_FORMAT).to_string();
        let mut path = self.dir.join(format!("{}-{stamp}.json", self.stem));
        let mut collision = 0u32;
        loop {
            match persist::atomic_write_new(&path, &bytes) {
                Ok(()) => break,
                // Two backups within one microsecond. `_` sorts after `.`,
                // so the suffixed name still orders after the first one.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    collision += 1;
                    path = self
                        .dir
                        .join(format!("{}-{stamp}_{collision:03}.json", self.stem));
                }
                Err(source) => return Err(self.error(source)),
            }
        }
        tracing::debug!(backup = %path.display(), "backed up registry");

        self.prune()?;
        Ok(Some(path))
    }

    /// Backups in this directory, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(self.error(source)),
        };

        let prefix = format!("{}-", self.stem);
        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| self.error(source))?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // `<stem>-<digit>...`: `ports-ci-...` belongs to another registry
            let stamped = name
                .strip_prefix(&prefix)
                .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()));
            if stamped && name.ends_with(".json") {
                backups.push(entry.path());
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// Delete all but the newest `retention` backups.
    pub fn prune(&self) -> Result<usize> {
        let backups = self.list()?;
        let excess = backups.len().saturating_sub(self.retention);
        for old in &backups[..excess] {
            if let Err(e) = std::fs::remove_file(old) {
                // Next prune tries again
                tracing::warn!(backup = %old.display(), "failed to remove old backup: {e}");
            }
        }
        if excess > 0 {
            tracing::debug!(removed = excess, kept = self.retention, "pruned backups");
        }
        Ok(excess)
    }

    fn error(&self, source: io::Error) -> RegistryError {
        RegistryError::Backup {
            path: self.dir.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_directory_sits_next_to_registry() {
        let manager = BackupManager::for_registry(Path::new("/srv/ci/ports.json"), None, 5);
        assert_eq!(manager.dir(), Path::new("/srv/ci/ports_backups"));
    }

    #[test]
    fn nothing_to_back_up() {
        let dir = TempDir::new().unwrap();
        let manager = BackupManager::for_registry(&dir.path().join("ports.json"), None, 5);

        assert_eq!(manager.backup(&dir.path().join("ports.json")).unwrap(), None);
        assert!(!manager.dir().exists());
    }

    #[test]
    fn backup_copies_current_contents() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("ports.json");
        std::fs::write(&registry, b"{\"environments\":{}}").unwrap();
        let manager = BackupManager::for_registry(&registry, None, 5);

        let backup = manager.backup(&registry).unwrap().unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().into_owned();

        assert!(name.starts_with("ports-") && name.ends_with("Z.json"), "{name}");
        assert_eq!(std::fs::read(&backup).unwrap(), std::fs::read(&registry).unwrap());
    }

    #[test]
    fn retention_keeps_newest() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("ports.json");
        let manager = BackupManager::for_registry(&registry, None, 3);

        let mut written = Vec::new();
        for i in 0..5 {
            std::fs::write(&registry, format!("{{\"n\":{i}}}")).unwrap();
            written.push(manager.backup(&registry).unwrap().unwrap());
        }

        let kept = manager.list().unwrap();
        assert_eq!(kept, written[2..].to_vec());
        assert_eq!(std::fs::read_to_string(&kept[2]).unwrap(), "{\"n\":4}");
    }

    #[test]
    fn unchanged_pre_image_is_backed_up_once() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("ports.json");
        std::fs::write(&registry, b"{\"n\":1}").unwrap();
        let manager = BackupManager::for_registry(&registry, None, 5);

        let first = manager.backup(&registry).unwrap().unwrap();
        let second = manager.backup(&registry).unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(manager.list().unwrap().len(), 1);

        std::fs::write(&registry, b"{\"n\":2}").unwrap();
        manager.backup(&registry).unwrap();
        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[test]
    fn registries_sharing_a_directory_keep_their_own_backups() {
        let dir = TempDir::new().unwrap();
        let shared = dir.path().join("bk");
        let main = dir.path().join("ports.json");
        let ci = dir.path().join("ports-ci.json");
        let main_backups = BackupManager::for_registry(&main, Some(&shared), 1);
        let ci_backups = BackupManager::for_registry(&ci, Some(&shared), 1);

        std::fs::write(&ci, b"ci").unwrap();
        ci_backups.backup(&ci).unwrap();
        std::fs::write(&main, b"main-1").unwrap();
        main_backups.backup(&main).unwrap();
        std::fs::write(&main, b"main-2").unwrap();
        main_backups.backup(&main).unwrap();

        assert_eq!(main_backups.list().unwrap().len(), 1);
        assert_eq!(ci_backups.list().unwrap().len(), 1);
    }

    #[test]
    fn list_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        let registry = dir.path().join("ports.json");
        let manager = BackupManager::for_registry(&registry, Some(&dir.path().join("bk")), 5);
        std::fs::create_dir_all(manager.dir()).unwrap();
        std::fs::write(manager.dir().join("notes.txt"), b"x").unwrap();
        std::fs::write(manager.dir().join("other-20240101T000000.000000Z.json"), b"x").unwrap();

        assert!(manager.list().unwrap().is_empty());
    }
}
