//! Durable client storage for key material
//!
//! The store is a tiny string-keyed map, shaped like browser local storage.
//! Only the key session reads or writes it, under two fixed entry names.

use crate::error::{ErrorCategory, ErrorKind, JournalsealError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Entry holding the (wrapped) PKCS#8 private key
pub const PRIVATE_KEY_ENTRY: &str = "privateKey";

/// Entry holding the (wrapped) raw symmetric key
pub const SYMMETRIC_KEY_ENTRY: &str = "symmetricKey";

/// String-valued persistent storage
pub trait KeyStore {
    /// Returns the entry, or `None` if it was never written or was removed.
    fn get(&self, name: &str) -> Result<Option<String>>;

    /// Creates or replaces the entry.
    fn set(&mut self, name: &str, value: &str) -> Result<()>;

    /// Removes the entry. Removing a missing entry is not an error.
    fn remove(&mut self, name: &str) -> Result<()>;
}

/// Keeps entries in memory only (tests, throwaway sessions)
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    entries: BTreeMap<String, String>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.entries.get(name).cloned())
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        self.entries.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        self.entries.remove(name);
        Ok(())
    }
}

/// Stores each entry as a file inside a directory
///
/// Writes go through a tempfile in the same directory followed by fsync and
/// rename, so an entry is always either the old or the new value. Files are
/// created with mode 0o600 on Unix systems.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// The directory is created lazily on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, name: &str) -> Result<PathBuf> {
        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(JournalsealError::with_kind(
                ErrorCategory::User,
                ErrorKind::InternalInvariant,
                format!("invalid key store entry name {:?}", name),
            ));
        }
        Ok(self.dir.join(name))
    }
}

impl KeyStore for FileKeyStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        let path = self.entry_path(name)?;
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(format!("failed to read from {}", path.display()), e)),
        }
    }

    fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let path = self.entry_path(name)?;
        fs::create_dir_all(&self.dir).map_err(|e| {
            io_error(format!("failed to create {}", self.dir.display()), e)
        })?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| io_error("failed to create tempfile", e))?;
        temp_file
            .write_all(value.as_bytes())
            .map_err(|e| io_error("failed to write to tempfile", e))?;
        // Flush and fsync() such that the rename later, if it succeeds, will
        // always point to a valid file.
        temp_file
            .flush()
            .map_err(|e| io_error("failed to flush tempfile", e))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| io_error("failed to sync file prior to rename", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = temp_file
                .as_file()
                .metadata()
                .map_err(|e| io_error("failed to get tempfile metadata", e))?
                .permissions();
            perms.set_mode(0o600);
            temp_file
                .as_file()
                .set_permissions(perms)
                .map_err(|e| io_error("failed to set tempfile permissions", e))?;
        }

        temp_file.persist(&path).map_err(|e| {
            io_error(
                format!("failed to rename to target file {}", path.display()),
                e.error,
            )
        })?;
        Ok(())
    }

    fn remove(&mut self, name: &str) -> Result<()> {
        let path = self.entry_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(format!("failed to remove {}", path.display()), e)),
        }
    }
}

fn io_error(msg: impl Into<String>, err: io::Error) -> JournalsealError {
    JournalsealError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    use std::os::unix::fs::PermissionsExt;

    fn exercise(store: &mut dyn KeyStore) {
        assert_eq!(store.get(PRIVATE_KEY_ENTRY).unwrap(), None);

        store.set(PRIVATE_KEY_ENTRY, "first").unwrap();
        assert_eq!(store.get(PRIVATE_KEY_ENTRY).unwrap().as_deref(), Some("first"));

        store.set(PRIVATE_KEY_ENTRY, "second").unwrap();
        assert_eq!(store.get(PRIVATE_KEY_ENTRY).unwrap().as_deref(), Some("second"));
        assert_eq!(store.get(SYMMETRIC_KEY_ENTRY).unwrap(), None);

        store.remove(PRIVATE_KEY_ENTRY).unwrap();
        assert_eq!(store.get(PRIVATE_KEY_ENTRY).unwrap(), None);

        // Removing again is a no-op
        store.remove(PRIVATE_KEY_ENTRY).unwrap();
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryKeyStore::new();
        exercise(&mut store);
        assert!(store.is_empty());
    }

    #[test]
    fn test_file_store() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileKeyStore::new(temp_dir.path().join("keys"));
        exercise(&mut store);
    }

    #[test]
    fn test_file_store_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("keys");

        FileKeyStore::new(&dir)
            .set(SYMMETRIC_KEY_ENTRY, "persisted")
            .unwrap();

        let reopened = FileKeyStore::new(&dir);
        assert_eq!(
            reopened.get(SYMMETRIC_KEY_ENTRY).unwrap().as_deref(),
            Some("persisted")
        );
    }

    #[test]
    fn test_file_store_missing_dir_reads_none() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileKeyStore::new(temp_dir.path().join("never-created"));
        assert_eq!(store.get(SYMMETRIC_KEY_ENTRY).unwrap(), None);
        store.remove(SYMMETRIC_KEY_ENTRY).unwrap();
    }

    #[test]
    fn test_file_store_rejects_path_like_names() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileKeyStore::new(temp_dir.path());
        for name in ["", "../escape", "a/b", "dot.file"] {
            assert!(store.set(name, "x").is_err(), "accepted {:?}", name);
            assert!(store.get(name).is_err());
        }
    }

    #[test]
    #[cfg(unix)]
    fn test_file_permissions() {
        let temp_dir = TempDir::new().unwrap();
        let mut store = FileKeyStore::new(temp_dir.path());
        store.set(PRIVATE_KEY_ENTRY, "secret").unwrap();

        let metadata = fs::metadata(temp_dir.path().join(PRIVATE_KEY_ENTRY)).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }
}
