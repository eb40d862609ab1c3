//! Secret storage backends
//!
//! The keyvault persists a handful of small named items (PEM key, hex
//! strings, the access token). Storage is a trait so the terminal can run
//! against the filesystem in production and against memory in tests.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::{KeyVaultError, Result};

/// Persistent key-value store for keyvault items.
pub trait SecretStorage: Send + Sync {
    /// Read an item. A missing item is `Ok(None)`, not an error.
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Write an item, replacing any previous value.
    fn put(&self, name: &str, value: &[u8]) -> Result<()>;

    /// Remove an item. Removing a missing item succeeds.
    fn remove(&self, name: &str) -> Result<()>;
}

/// One file per item under a root directory.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&root, fs::Permissions::from_mode(0o700))?;
        }

        Ok(Self { root })
    }

    fn item_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(KeyVaultError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("invalid storage item name: {name:?}"),
            )));
        }
        Ok(self.root.join(name))
    }
}

impl SecretStorage for FileStorage {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.item_path(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, name: &str, value: &[u8]) -> Result<()> {
        let path = self.item_path(name)?;
        let temp_path = path.with_file_name(format!("{name}.tmp"));

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path)?;
        file.write_all(value)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &path)?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        let path = self.item_path(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStorage for MemoryStorage {
    fn get(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.items.read().get(name).cloned())
    }

    fn put(&self, name: &str, value: &[u8]) -> Result<()> {
        self.items.write().insert(name.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.items.write().remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("keys")).unwrap();

        assert!(storage.get("access_token").unwrap().is_none());

        storage.put("access_token", b"bearer-123").unwrap();
        assert_eq!(storage.get("access_token").unwrap().unwrap(), b"bearer-123");

        storage.put("access_token", b"bearer-456").unwrap();
        assert_eq!(storage.get("access_token").unwrap().unwrap(), b"bearer-456");

        storage.remove("access_token").unwrap();
        assert!(storage.get("access_token").unwrap().is_none());

        // Removing twice is fine
        storage.remove("access_token").unwrap();
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.put("device_public.hex", b"04abcd").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["device_public.hex".to_string()]);
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();

        assert!(storage.put("../escape", b"x").is_err());
        assert!(storage.get("a/b").is_err());
        assert!(storage.put("", b"x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_items_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        storage.put("device_private.pem", b"secret").unwrap();

        let mode = fs::metadata(dir.path().join("device_private.pem"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.put("server_public.hex", b"04ff").unwrap();
        assert_eq!(storage.get("server_public.hex").unwrap().unwrap(), b"04ff");
        storage.remove("server_public.hex").unwrap();
        assert!(storage.get("server_public.hex").unwrap().is_none());
    }
}
