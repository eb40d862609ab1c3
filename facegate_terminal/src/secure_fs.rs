//! FaceGate Terminal - Secure Filesystem Operations
//!
//! Atomic writes for the dataset file: write to a sibling temp file, fsync,
//! then rename over the target. Readers see either the old file or the new
//! one, never a half-written mix.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::TerminalResult;

/// Filesystem handler rooted at the terminal data directory
pub struct SecureFs {
    root: PathBuf,
}

impl SecureFs {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Get full path for a relative file
    pub fn full_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Write file atomically
    pub fn write_file(&self, relative_path: &str, data: &[u8]) -> TerminalResult<()> {
        let path = self.full_path(relative_path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = temp_path_for(&path);

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let result = (|| -> std::io::Result<()> {
            let mut file = options.open(&temp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            fs::rename(&temp_path, &path)
        })();

        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        // Make the rename itself durable
        #[cfg(unix)]
        {
            if let Some(dir) = path.parent().and_then(|p| fs::File::open(p).ok()) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// Read a file, `None` when it does not exist
    pub fn read_file(&self, relative_path: &str) -> TerminalResult<Option<Vec<u8>>> {
        match fs::read(self.full_path(relative_path)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_secure_fs() {
        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());

        assert!(fs.read_file("cache/dataset.json").unwrap().is_none());

        fs.write_file("cache/dataset.json", b"{\"dataset\":[]}").unwrap();
        assert!(dir.path().join("cache/dataset.json").exists());
        assert!(!dir.path().join("cache/dataset.json.tmp").exists());

        let data = fs.read_file("cache/dataset.json").unwrap().unwrap();
        assert_eq!(data, b"{\"dataset\":[]}");

        fs.write_file("cache/dataset.json", b"v2").unwrap();
        assert_eq!(fs.read_file("cache/dataset.json").unwrap().unwrap(), b"v2");
        assert!(!dir.path().join("cache/dataset.json.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let fs = SecureFs::new(dir.path());
        fs.write_file("dataset.json", b"{}").unwrap();

        let mode = std::fs::metadata(fs.full_path("dataset.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
