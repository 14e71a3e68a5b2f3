//! Exclusive storage directory lock
//!
//! Two processes appending to the same head files would interleave records,
//! so a storage directory is locked for as long as it is open. The lock is
//! released when the [`DirectoryLock`] is dropped (or the process dies).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tessera_core::{Error, Result};
use tracing::debug;

/// Held lock on a storage directory
#[derive(Debug)]
pub struct DirectoryLock {
    path: PathBuf,
    _file: File,
}

impl DirectoryLock {
    /// Lock `lock_path`, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the directory is already in use.
    pub fn acquire(lock_path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)
            .map_err(|e| Error::file_io(lock_path, e))?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|_| {
            Error::configuration(format!(
                "storage at '{}' is already in use",
                lock_path
                    .parent()
                    .unwrap_or(lock_path)
                    .display()
            ))
        })?;
        debug!(target: "tessera::storage", path = %lock_path.display(), "Acquired directory lock");
        Ok(Self {
            path: lock_path.to_path_buf(),
            _file: file,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails_until_released() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".lock");
        let first = DirectoryLock::acquire(&path).unwrap();
        assert!(matches!(
            DirectoryLock::acquire(&path),
            Err(Error::Configuration(_))
        ));
        drop(first);
        assert!(DirectoryLock::acquire(&path).is_ok());
    }
}
