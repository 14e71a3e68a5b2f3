//! Storage configuration via `tessera.toml`
//!
//! On first open a commented default `tessera.toml` is written into the
//! storage directory. To change settings, edit the file and reopen. The byte
//! order and channel count only apply to a new storage; an existing storage
//! must be reopened with the values it was created with.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tessera_core::{Endianness, Error, Result};
use tessera_storage::evaluator::{
    DEFAULT_FILE_MAXIMUM_SIZE, DEFAULT_FILE_MINIMUM_SIZE, DEFAULT_MINIMUM_USE_RATIO,
};
use tessera_storage::{validate_channel_count, DataFileEvaluator, HousekeepingOptions};

pub use tessera_storage::layout::CONFIG_FILE_NAME;

/// Storage configuration loaded from `tessera.toml`.
///
/// # Example
///
/// ```toml
/// channel_count = 4
/// byte_order = "little"
/// file_maximum_size = 8388608
/// housekeeping_interval_ms = 1000
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Number of channels, a power of two in 1..=1024
    pub channel_count: usize,
    /// Byte order of every record, `"little"` or `"big"` in the file
    pub byte_order: Endianness,
    /// Sealed files below this size are consolidated
    pub file_minimum_size: u64,
    /// Head files at or above this size are rolled over
    pub file_maximum_size: u64,
    /// Files with a lower live-data ratio are consolidated
    pub minimum_use_ratio: f64,
    /// Whether housekeeping may consolidate the head file
    pub cleanup_head_file: bool,
    /// Idle time before a channel housekeeps; 0 disables it
    pub housekeeping_interval_ms: u64,
    /// Housekeep after every store
    pub housekeeping_on_store: bool,
    /// Ids reserved per id file write
    pub id_batch_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            channel_count: 1,
            byte_order: Endianness::Little,
            file_minimum_size: DEFAULT_FILE_MINIMUM_SIZE,
            file_maximum_size: DEFAULT_FILE_MAXIMUM_SIZE,
            minimum_use_ratio: DEFAULT_MINIMUM_USE_RATIO,
            cleanup_head_file: true,
            housekeeping_interval_ms: 1000,
            housekeeping_on_store: false,
            id_batch_size: tessera_storage::DEFAULT_ID_BATCH_SIZE,
        }
    }
}

impl StorageConfig {
    /// Validated data file evaluator
    pub fn evaluator(&self) -> Result<DataFileEvaluator> {
        DataFileEvaluator::new(
            self.file_minimum_size,
            self.file_maximum_size,
            self.minimum_use_ratio,
            self.cleanup_head_file,
        )
    }

    /// Housekeeping schedule
    pub fn housekeeping(&self) -> HousekeepingOptions {
        HousekeepingOptions {
            interval: (self.housekeeping_interval_ms > 0)
                .then(|| Duration::from_millis(self.housekeeping_interval_ms)),
            on_store: self.housekeeping_on_store,
        }
    }

    /// Check every value
    pub fn validate(&self) -> Result<()> {
        validate_channel_count(self.channel_count)?;
        self.evaluator()?;
        if self.id_batch_size == 0 {
            return Err(Error::configuration("id_batch_size must be positive"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Tessera storage configuration
#
# Number of channels (power of two, 1..=1024). Object ids are spread over
# channels by their low bits; each channel has its own files and writer.
# Fixed when the storage is created.
channel_count = 1

# Byte order of every record: "little" (default) or "big".
# Fixed when the storage is created.
byte_order = "little"

# Data files (bytes). A head file at or above the maximum is rolled over;
# sealed files below the minimum are consolidated.
file_minimum_size = 1048576
file_maximum_size = 8388608

# Files whose live-data ratio drops below this are consolidated (0 < r <= 1).
minimum_use_ratio = 0.75

# Let housekeeping consolidate the head file too (rolls over first).
cleanup_head_file = true

# Idle time in milliseconds before a channel housekeeps (0 = never).
housekeeping_interval_ms = 1000

# Housekeep after every store (default: false).
housekeeping_on_store = false

# Object and type ids reserved per id file write.
id_batch_size = 1000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_io(path, e))?;
        let config: StorageConfig = toml::from_str(&content).map_err(|e| {
            Error::configuration(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| Error::file_io(path, e))?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| Error::file_io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_is_valid() {
        let config = StorageConfig::default();
        config.validate().unwrap();
        assert_eq!(config.byte_order, Endianness::Little);
        assert_eq!(
            config.housekeeping().interval,
            Some(Duration::from_millis(1000))
        );
    }

    #[test]
    fn default_toml_matches_default() {
        let config: StorageConfig = toml::from_str(StorageConfig::default_toml()).unwrap();
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn parse_invalid_byte_order_returns_error() {
        assert!(toml::from_str::<StorageConfig>("byte_order = \"middle\"").is_err());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "byte_order = \"middle\"\n").unwrap();
        assert!(matches!(
            StorageConfig::from_file(&path),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn invalid_channel_count_rejected() {
        let config: StorageConfig = toml::from_str("channel_count = 3").unwrap();
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn invalid_file_sizes_rejected() {
        let config: StorageConfig =
            toml::from_str("file_minimum_size = 4096\nfile_maximum_size = 4096").unwrap();
        assert!(config.validate().is_err());
        let config: StorageConfig = toml::from_str("minimum_use_ratio = 0.0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_interval_disables_housekeeping() {
        let config: StorageConfig = toml::from_str("housekeeping_interval_ms = 0").unwrap();
        assert_eq!(config.housekeeping().interval, None);
    }

    #[test]
    fn write_default_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert!(!path.exists());

        StorageConfig::write_default_if_missing(&path).unwrap();
        assert!(path.exists());

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.channel_count, 1);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        std::fs::write(&path, "channel_count = 4\n").unwrap();
        StorageConfig::write_default_if_missing(&path).unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.channel_count, 4);
    }

    #[test]
    fn from_file_with_missing_field_uses_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        // Empty config file: all fields use defaults
        std::fs::write(&path, "").unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config, StorageConfig::default());
    }

    #[test]
    fn write_to_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let config = StorageConfig {
            channel_count: 8,
            byte_order: Endianness::Big,
            housekeeping_interval_ms: 0,
            ..StorageConfig::default()
        };
        config.write_to_file(&path).unwrap();
        let loaded = StorageConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.byte_order, Endianness::Big);
    }
}
