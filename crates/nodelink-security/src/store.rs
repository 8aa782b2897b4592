//! Named secret blobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroizing;

use crate::error::StoreError;

/// Read access to small named secret blobs.
pub trait SecretStore: Send + Sync {
    /// Returns the blob stored under `name`.
    fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, StoreError>;
}

fn check_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        && name != "."
        && name != "..";
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName {
            name: name.to_string(),
        })
    }
}

/// In-memory store, for tests and provisioning tools.
#[derive(Default)]
pub struct MemorySecretStore {
    blobs: HashMap<String, Zeroizing<Vec<u8>>>,
}

impl MemorySecretStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `name`, replacing any previous blob.
    pub fn put(&mut self, name: &str, value: &[u8]) -> Result<(), StoreError> {
        check_name(name)?;
        self.blobs
            .insert(name.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }
}

impl std::fmt::Debug for MemorySecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySecretStore")
            .field("names", &self.blobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        check_name(name)?;
        self.blobs
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                name: name.to_string(),
            })
    }
}

/// One file per blob under a directory.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `value` under `name`, creating the directory if needed.
    pub fn put(&self, name: &str, value: &[u8]) -> Result<(), StoreError> {
        check_name(name)?;
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.dir.join(name), value)?;
        debug!(name, len = value.len(), "secret blob written");
        Ok(())
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, StoreError> {
        check_name(name)?;
        match std::fs::read(self.dir.join(name)) {
            Ok(bytes) => Ok(Zeroizing::new(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::NotFound {
                name: name.to_string(),
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_put_get() {
        let mut store = MemorySecretStore::new();
        store.put("cmd_key", &[1, 2, 3]).unwrap();
        assert_eq!(store.get("cmd_key").unwrap().as_slice(), &[1, 2, 3]);
        assert!(matches!(
            store.get("other"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_memory_store_debug_hides_values() {
        let mut store = MemorySecretStore::new();
        store.put("k", b"topsecret").unwrap();
        assert!(!format!("{:?}", store).contains("topsecret"));
    }

    #[test]
    fn test_invalid_names() {
        let store = MemorySecretStore::new();
        for name in ["", "..", ".", "a/b", "a b", "ключ"] {
            assert!(matches!(
                store.get(name),
                Err(StoreError::InvalidName { .. })
            ));
        }
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSecretStore::new(dir.path().join("secrets"));
        store.put("cmd_key.bin", &[9u8; 32]).unwrap();
        assert_eq!(store.get("cmd_key.bin").unwrap().len(), 32);
        assert!(matches!(
            store.get("missing"),
            Err(StoreError::NotFound { .. })
        ));
        assert!(store.put("../escape", b"x").is_err());
    }
}
