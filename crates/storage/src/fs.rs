//! File system collaborator
//!
//! All storage I/O goes through the [`FileSystem`] trait so that the channel
//! logic never touches `std::fs` directly. Two implementations:
//!
//! - [`LocalFileSystem`]: local disk, fsync on every append and rewrite
//! - [`MemoryFileSystem`]: volatile in-process files, for tests and caches
//!
//! Writes are all-or-nothing from the caller's point of view: a short write
//! is retried by the implementation or reported as an error, never returned
//! as a partial count.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tessera_core::{Error, Result};

/// Byte-addressable file access used by the storage layer
pub trait FileSystem: Send + Sync + std::fmt::Debug {
    /// Fill `buf` from `path` starting at `offset`
    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Whole file content
    fn read_all(&self, path: &Path) -> Result<Vec<u8>>;

    /// Append `buffers` in order, creating the file if needed
    ///
    /// Returns the total number of bytes written.
    fn append(&self, path: &Path, buffers: &[&[u8]]) -> Result<u64>;

    /// Overwrite bytes in place
    fn write_at(&self, path: &Path, offset: u64, bytes: &[u8]) -> Result<()>;

    /// Atomically replace the whole file
    fn replace(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    /// Current length
    fn file_size(&self, path: &Path) -> Result<u64>;

    /// Cut the file to `length` bytes
    fn truncate(&self, path: &Path, length: u64) -> Result<()>;

    /// Remove a file
    fn delete(&self, path: &Path) -> Result<()>;

    /// Move a file into `target_dir`, keeping its name
    fn move_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf>;

    /// Copy a file into `target_dir`, keeping its name
    fn copy_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf>;

    /// Create a directory and its parents
    fn create_dir_all(&self, dir: &Path) -> Result<()>;

    /// Files directly inside `dir`, sorted; empty if `dir` does not exist
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    /// True if a file exists
    fn exists(&self, path: &Path) -> bool;
}

fn target_path(path: &Path, target_dir: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| {
        Error::invalid_operation(format!("'{}' has no file name", path.display()))
    })?;
    Ok(target_dir.join(name))
}

// ============================================================================
// Local disk
// ============================================================================

/// `std::fs` backed file system
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    /// Create the local file system
    pub fn new() -> Self {
        LocalFileSystem
    }

    fn sync_parent(path: &Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            if parent.exists() {
                // Directory fsync is not supported everywhere
                if let Ok(dir) = File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
        }
        Ok(())
    }
}

impl FileSystem for LocalFileSystem {
    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut io = || -> io::Result<()> {
            let mut file = File::open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(buf)
        };
        io().map_err(|e| Error::file_io(path, e))
    }

    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).map_err(|e| Error::file_io(path, e))
    }

    fn append(&self, path: &Path, buffers: &[&[u8]]) -> Result<u64> {
        let io = || -> io::Result<u64> {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            let mut written = 0u64;
            for buffer in buffers {
                file.write_all(buffer)?;
                written += buffer.len() as u64;
            }
            file.sync_data()?;
            Ok(written)
        };
        io().map_err(|e| Error::file_io(path, e))
    }

    fn write_at(&self, path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
        let io = || -> io::Result<()> {
            let mut file = OpenOptions::new().write(true).open(path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(bytes)?;
            file.sync_data()
        };
        io().map_err(|e| Error::file_io(path, e))
    }

    fn replace(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let io = || -> io::Result<()> {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::rename(&temp_path, path)?;
            Self::sync_parent(path)
        };
        io().map_err(|e| Error::file_io(path, e))
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| Error::file_io(path, e))
    }

    fn truncate(&self, path: &Path, length: u64) -> Result<()> {
        let io = || -> io::Result<()> {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(length)?;
            file.sync_all()
        };
        io().map_err(|e| Error::file_io(path, e))
    }

    fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).map_err(|e| Error::file_io(path, e))
    }

    fn move_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf> {
        let target = target_path(path, target_dir)?;
        fs::rename(path, &target).map_err(|e| Error::file_io(path, e))?;
        Ok(target)
    }

    fn copy_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf> {
        let target = target_path(path, target_dir)?;
        fs::copy(path, &target).map_err(|e| Error::file_io(path, e))?;
        Ok(target)
    }

    fn create_dir_all(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::file_io(dir, e))
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::file_io(dir, e)),
        };
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::file_io(dir, e))?;
            let is_file = entry
                .file_type()
                .map(|t| t.is_file())
                .map_err(|e| Error::file_io(entry.path(), e))?;
            if is_file {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

// ============================================================================
// In memory
// ============================================================================

/// Volatile file system keeping every file in a map
///
/// Directories are implicit: a file exists under any path prefix.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: RwLock<BTreeMap<PathBuf, Vec<u8>>>,
}

impl MemoryFileSystem {
    /// Empty file system
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    fn not_found(path: &Path) -> Error {
        Error::file_io(path, io::Error::new(io::ErrorKind::NotFound, "no such file"))
    }
}

impl FileSystem for MemoryFileSystem {
    fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
        let files = self.files.read();
        let data = files.get(path).ok_or_else(|| Self::not_found(path))?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(Error::file_io(
                path,
                io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of file"),
            ));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Self::not_found(path))
    }

    fn append(&self, path: &Path, buffers: &[&[u8]]) -> Result<u64> {
        let mut files = self.files.write();
        let data = files.entry(path.to_path_buf()).or_default();
        let mut written = 0u64;
        for buffer in buffers {
            data.extend_from_slice(buffer);
            written += buffer.len() as u64;
        }
        Ok(written)
    }

    fn write_at(&self, path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut files = self.files.write();
        let data = files.get_mut(path).ok_or_else(|| Self::not_found(path))?;
        let start = offset as usize;
        let end = start + bytes.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn replace(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        self.files.write().insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    fn file_size(&self, path: &Path) -> Result<u64> {
        self.files
            .read()
            .get(path)
            .map(|d| d.len() as u64)
            .ok_or_else(|| Self::not_found(path))
    }

    fn truncate(&self, path: &Path, length: u64) -> Result<()> {
        let mut files = self.files.write();
        let data = files.get_mut(path).ok_or_else(|| Self::not_found(path))?;
        data.truncate(length as usize);
        Ok(())
    }

    fn delete(&self, path: &Path) -> Result<()> {
        self.files
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(path))
    }

    fn move_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf> {
        let target = target_path(path, target_dir)?;
        let mut files = self.files.write();
        let data = files.remove(path).ok_or_else(|| Self::not_found(path))?;
        files.insert(target.clone(), data);
        Ok(target)
    }

    fn copy_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf> {
        let target = target_path(path, target_dir)?;
        let mut files = self.files.write();
        let data = files.get(path).cloned().ok_or_else(|| Self::not_found(path))?;
        files.insert(target.clone(), data);
        Ok(target)
    }

    fn create_dir_all(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .files
            .read()
            .keys()
            .filter(|p| p.parent() == Some(dir))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.read().contains_key(path)
    }
}
