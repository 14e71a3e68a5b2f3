//! Storage directory layout
//!
//! ```text
//! <root>/
//!   tessera.toml            configuration
//!   storage.meta            byte order and channel count, fixed at creation
//!   TypeDictionary.ptd      type dictionary text
//!   ObjectId.id             object id high-water mark
//!   TypeId.id               type id high-water mark
//!   .lock                   exclusive directory lock
//!   channel_0/
//!     channel_0_1.dat
//!     channel_0_2.dat
//!   channel_1/
//!     ...
//! ```

use std::path::{Path, PathBuf};

/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "tessera.toml";
/// Metadata file name
pub const META_FILE_NAME: &str = "storage.meta";
/// Type dictionary file name
pub const DICTIONARY_FILE_NAME: &str = "TypeDictionary.ptd";
/// Object id high-water mark file name
pub const OBJECT_ID_FILE_NAME: &str = "ObjectId.id";
/// Type id high-water mark file name
pub const TYPE_ID_FILE_NAME: &str = "TypeId.id";
/// Lock file name
pub const LOCK_FILE_NAME: &str = ".lock";

const DATA_FILE_EXTENSION: &str = "dat";

/// Paths of one storage directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `tessera.toml`
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    /// `storage.meta`
    pub fn meta_file(&self) -> PathBuf {
        self.root.join(META_FILE_NAME)
    }

    /// `TypeDictionary.ptd`
    pub fn dictionary_file(&self) -> PathBuf {
        self.root.join(DICTIONARY_FILE_NAME)
    }

    /// `ObjectId.id`
    pub fn object_id_file(&self) -> PathBuf {
        self.root.join(OBJECT_ID_FILE_NAME)
    }

    /// `TypeId.id`
    pub fn type_id_file(&self) -> PathBuf {
        self.root.join(TYPE_ID_FILE_NAME)
    }

    /// `.lock`
    pub fn lock_file(&self) -> PathBuf {
        self.root.join(LOCK_FILE_NAME)
    }

    /// `channel_<n>/`
    pub fn channel_dir(&self, channel: usize) -> PathBuf {
        self.root.join(format!("channel_{}", channel))
    }

    /// `channel_<n>/channel_<n>_<file_number>.dat`
    pub fn data_file(&self, channel: usize, file_number: u64) -> PathBuf {
        self.channel_dir(channel).join(format!(
            "channel_{}_{}.{}",
            channel, file_number, DATA_FILE_EXTENSION
        ))
    }

    /// File number of a data file path belonging to `channel`
    pub fn parse_data_file(&self, channel: usize, path: &Path) -> Option<u64> {
        if path.extension()? != DATA_FILE_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let number = stem.strip_prefix(&format!("channel_{}_", channel))?;
        number.parse().ok().filter(|n| *n > 0)
    }

    /// Non-data files copied by a backup
    pub fn metadata_files(&self) -> [PathBuf; 4] {
        [
            self.meta_file(),
            self.dictionary_file(),
            self.object_id_file(),
            self.type_id_file(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_file_names() {
        let layout = StorageLayout::new("/data");
        let path = layout.data_file(3, 17);
        assert_eq!(path, PathBuf::from("/data/channel_3/channel_3_17.dat"));
        assert_eq!(layout.parse_data_file(3, &path), Some(17));
    }

    #[test]
    fn test_parse_rejects_foreign_files() {
        let layout = StorageLayout::new("/data");
        assert_eq!(layout.parse_data_file(2, &layout.data_file(3, 1)), None);
        assert_eq!(layout.parse_data_file(3, Path::new("/data/channel_3/channel_3_x.dat")), None);
        assert_eq!(layout.parse_data_file(3, Path::new("/data/channel_3/channel_3_4.tmp")), None);
        assert_eq!(layout.parse_data_file(3, Path::new("/data/channel_3/channel_3_0.dat")), None);
    }

    #[test]
    fn test_fixed_files() {
        let layout = StorageLayout::new("/data");
        assert!(layout.dictionary_file().ends_with("TypeDictionary.ptd"));
        assert!(layout.object_id_file().ends_with("ObjectId.id"));
        assert!(layout.type_id_file().ends_with("TypeId.id"));
        assert_eq!(layout.metadata_files().len(), 4);
    }
}
