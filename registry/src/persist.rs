//! Durable reads and writes of the registry document.
//!
//! Writes go to a temp file in the destination directory, are fsynced, then
//! renamed over the destination. Readers see either the old document or the
//! new one. A failed write drops the temp file and leaves the destination
//! untouched.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{RegistryError, Result};
use crate::model::RegistryState;

/// Replace `path` with `bytes` atomically.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path);
    let tmp = write_temp(parent, bytes)?;
    tmp.persist(path).map_err(|err| err.error)?;
    sync_parent_dir(parent);
    Ok(())
}

/// Create `path` with `bytes` atomically, failing with
/// [`io::ErrorKind::AlreadyExists`] if it is already there.
pub fn atomic_write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = parent_dir(path);
    let tmp = write_temp(parent, bytes)?;
    tmp.persist_noclobber(path).map_err(|err| err.error)?;
    sync_parent_dir(parent);
    Ok(())
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

fn write_temp(parent: &Path, bytes: &[u8]) -> io::Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

fn sync_parent_dir(parent: &Path) {
    #[cfg(unix)]
    if let Err(e) = File::open(parent).and_then(|d| d.sync_all()) {
        tracing::debug!(path = %parent.display(), "parent directory sync failed (best-effort): {e}");
    }
    #[cfg(not(unix))]
    let _ = parent;
}

/// Serialized form of the document, as written to disk.
pub fn to_bytes(state: &RegistryState) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(state)
        .map_err(|source| RegistryError::Serialize { source })?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Read and validate the registry at `path`.
pub fn load_registry(path: &Path) -> Result<RegistryState> {
    let file = File::open(path).map_err(|source| RegistryError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let state: RegistryState =
        serde_json::from_reader(io::BufReader::new(file)).map_err(|source| {
            RegistryError::Corrupted {
                path: path.to_path_buf(),
                source,
            }
        })?;
    state
        .validate()
        .map_err(|reason| RegistryError::InvalidDocument {
            path: path.to_path_buf(),
            reason,
        })?;
    tracing::debug!(path = %path.display(), "loaded registry");
    Ok(state)
}

/// Atomically replace the registry at `path` with `state`.
pub fn save_registry(path: &Path, state: &RegistryState) -> Result<()> {
    let bytes = to_bytes(state)?;
    atomic_write(path, &bytes).map_err(|source| RegistryError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "persisted registry");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PortRange;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn sample() -> RegistryState {
        let mut state =
            RegistryState::with_environments([("development", PortRange::new(5000, 5999))])
                .unwrap();
        state
            .environment_mut("development")
            .unwrap()
            .assignments
            .insert("feature-x".to_string(), 5000);
        state
    }

    fn leftover_temp_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(".tmp"))
            .collect()
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");

        save_registry(&path, &sample()).unwrap();
        assert_eq!(load_registry(&path).unwrap(), sample());
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn resaving_loaded_document_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        save_registry(&path, &sample()).unwrap();
        let before = std::fs::read(&path).unwrap();

        save_registry(&path, &load_registry(&path).unwrap()).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn atomic_write_new_refuses_to_clobber() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");

        atomic_write_new(&path, b"first").unwrap();
        let err = atomic_write_new(&path, b"second").unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"first");
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn failed_write_leaves_destination_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        atomic_write(&path, b"original").unwrap();

        // Renaming a file over a non-empty directory fails
        let blocked = dir.path().join("blocked");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("keep"), b"x").unwrap();
        assert!(atomic_write(&blocked, b"new").is_err());

        assert_eq!(std::fs::read(&path).unwrap(), b"original");
        assert!(leftover_temp_files(dir.path()).is_empty());
    }

    #[test]
    fn unparseable_registry_is_corrupted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_registry(&path),
            Err(RegistryError::Corrupted { .. })
        ));
    }

    #[test]
    fn out_of_range_assignment_is_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ports.json");
        std::fs::write(
            &path,
            r#"{"environments":{"dev":{"port_range":{"start":1,"end":2},"assignments":{"a":9}}}}"#,
        )
        .unwrap();

        assert!(matches!(
            load_registry(&path),
            Err(RegistryError::InvalidDocument { .. })
        ));
    }

    #[test]
    fn missing_registry_is_a_read_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            load_registry(&dir.path().join("absent.json")),
            Err(RegistryError::Read { .. })
        ));
    }
}
