//! `storage.meta`: dataset properties fixed at creation
//!
//! ```toml
//! format_version = 1
//! byte_order = "little"
//! channel_count = 4
//! ```

use crate::fs::FileSystem;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tessera_core::{Endianness, Error, Result};

/// Current on-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Dataset metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageMeta {
    /// On-disk format version
    pub format_version: u32,
    /// Byte order of every record
    pub byte_order: Endianness,
    /// Number of channels
    pub channel_count: usize,
}

impl StorageMeta {
    /// Metadata for a new dataset
    pub fn new(byte_order: Endianness, channel_count: usize) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            byte_order,
            channel_count,
        }
    }

    /// Read the meta file, if present
    pub fn read(fs: &dyn FileSystem, path: &Path) -> Result<Option<Self>> {
        if !fs.exists(path) {
            return Ok(None);
        }
        let bytes = fs.read_all(path)?;
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::configuration(format!("'{}' is not UTF-8: {}", path.display(), e))
        })?;
        let meta: StorageMeta = toml::from_str(&text).map_err(|e| {
            Error::configuration(format!(
                "Failed to parse meta file '{}': {}",
                path.display(),
                e
            ))
        })?;
        if meta.format_version != FORMAT_VERSION {
            return Err(Error::configuration(format!(
                "Unsupported storage format version {} in '{}'",
                meta.format_version,
                path.display()
            )));
        }
        Ok(Some(meta))
    }

    /// Write the meta file atomically
    pub fn write(&self, fs: &dyn FileSystem, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize meta: {}", e)))?;
        fs.replace(path, content.as_bytes())
    }

    /// Check that a configuration matches an existing dataset
    pub fn check(&self, byte_order: Endianness, channel_count: usize) -> Result<()> {
        if self.byte_order != byte_order {
            return Err(Error::configuration(format!(
                "storage was created with byte order '{}', configured '{}'",
                self.byte_order, byte_order
            )));
        }
        if self.channel_count != channel_count {
            return Err(Error::configuration(format!(
                "storage was created with {} channels, configured {}",
                self.channel_count, channel_count
            )));
        }
        Ok(())
    }

    /// Existing metadata, or new metadata written for a new dataset
    pub fn read_or_create(
        fs: &dyn FileSystem,
        path: &Path,
        byte_order: Endianness,
        channel_count: usize,
    ) -> Result<Self> {
        match Self::read(fs, path)? {
            Some(meta) => {
                meta.check(byte_order, channel_count)?;
                Ok(meta)
            }
            None => {
                let meta = Self::new(byte_order, channel_count);
                meta.write(fs, path)?;
                Ok(meta)
            }
        }
    }
}
