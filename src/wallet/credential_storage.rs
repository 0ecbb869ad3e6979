// src/wallet/credential_storage.rs
//! Local persistent key-value storage backing the credential vault.
//!
//! The vault writes whole records through [`VaultStore::put`], which must
//! replace the value atomically: readers observe either the previous record or
//! the new one, never a mix.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};

/// Byte-oriented key-value store.
pub trait VaultStore: Send + Sync {
    /// Returns the value under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replaces the value under `key`.
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Removes `key`. Returns whether a value was present.
    fn delete(&self, key: &str) -> Result<bool>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

impl<S: VaultStore + ?Sized> VaultStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(key, value)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        (**self).delete(key)
    }
}

/// In-memory store.
///
/// # Note
/// Contents are lost when the process exits; intended for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl VaultStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().remove(key).is_some())
    }
}

/// Directory-backed store holding one file per key.
///
/// Writes go to a temporary sibling file that is fsynced and then renamed
/// over the target, which is atomic on the same filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `directory`.
    ///
    /// # Errors
    /// [`Error::StorageUnavailable`] if the directory cannot be created.
    pub fn open(directory: impl AsRef<Path>) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        fs::create_dir_all(&directory)
            .map_err(|e| Error::StorageUnavailable(format!("create {}: {}", directory.display(), e)))?;
        Ok(FileStore { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(Error::StorageUnavailable(format!("invalid storage key '{}'", key)));
        }
        Ok(self.directory.join(format!("{}.json", key)))
    }
}

impl VaultStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StorageUnavailable(format!("read {}: {}", path.display(), e))),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let staging = path.with_extension("json.tmp");
        {
            let mut file = File::create(&staging)?;
            file.write_all(value)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &path)
            .map_err(|e| Error::StorageUnavailable(format!("commit {}: {}", path.display(), e)))
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::StorageUnavailable(format!("delete {}: {}", path.display(), e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn VaultStore) {
        assert!(store.get("record").unwrap().is_none());
        assert!(!store.contains("record").unwrap());

        store.put("record", b"first").unwrap();
        store.put("record", b"second").unwrap();
        assert_eq!(store.get("record").unwrap().unwrap(), b"second");

        assert!(store.delete("record").unwrap());
        assert!(!store.delete("record").unwrap());
        assert!(store.get("record").unwrap().is_none());
    }

    #[test]
    fn test_memory_store_operations() {
        let store = MemoryStore::new();
        exercise(&store);
        store.put("a", b"1").unwrap();
        store.put("b", b"2").unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_file_store_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("vault")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_file_store_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put("vault_record", b"{}").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["vault_record.json".to_string()]);
    }

    #[test]
    fn test_file_store_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.put("../escape", b"x"),
            Err(Error::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_shared_store_through_arc() {
        let store = Arc::new(MemoryStore::new());
        let handle: Arc<MemoryStore> = store.clone();
        handle.put("k", b"v").unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"v");
    }
}
