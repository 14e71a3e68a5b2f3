//! Data file evaluation
//!
//! Decides when a head file must be retired (rollover) and which files
//! housekeeping should dissolve into the head.
//!
//! A file is dissolved when any of these hold (the head only if
//! `cleanup_head_file` is set):
//! - it is a sealed file smaller than `file_minimum_size`
//! - its fill ratio is below `minimum_use_ratio`
//! - it is larger than `file_maximum_size`, unless it holds one gapless record

use crate::data_file::DataFile;
use tessera_core::{Error, Result};

/// Default minimum data file size (1 MiB)
pub const DEFAULT_FILE_MINIMUM_SIZE: u64 = 1024 * 1024;
/// Default maximum data file size (8 MiB)
pub const DEFAULT_FILE_MAXIMUM_SIZE: u64 = 8 * 1024 * 1024;
/// Default minimum fill ratio
pub const DEFAULT_MINIMUM_USE_RATIO: f64 = 0.75;
/// Smallest allowed minimum file size, and the smallest allowed gap between
/// minimum and maximum
pub const FILE_SIZE_FLOOR: u64 = 1024;

/// Size and fill thresholds for data files
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataFileEvaluator {
    file_minimum_size: u64,
    file_maximum_size: u64,
    minimum_use_ratio: f64,
    cleanup_head_file: bool,
}

impl Default for DataFileEvaluator {
    fn default() -> Self {
        Self {
            file_minimum_size: DEFAULT_FILE_MINIMUM_SIZE,
            file_maximum_size: DEFAULT_FILE_MAXIMUM_SIZE,
            minimum_use_ratio: DEFAULT_MINIMUM_USE_RATIO,
            cleanup_head_file: true,
        }
    }
}

impl DataFileEvaluator {
    /// Validated evaluator
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the minimum size is below 1 KiB, the
    /// maximum is not at least 1 KiB above the minimum, or the ratio is not
    /// in `(0, 1]`.
    pub fn new(
        file_minimum_size: u64,
        file_maximum_size: u64,
        minimum_use_ratio: f64,
        cleanup_head_file: bool,
    ) -> Result<Self> {
        if file_minimum_size < FILE_SIZE_FLOOR {
            return Err(Error::configuration(format!(
                "file_minimum_size {} is below {}",
                file_minimum_size, FILE_SIZE_FLOOR
            )));
        }
        if file_maximum_size < file_minimum_size + FILE_SIZE_FLOOR {
            return Err(Error::configuration(format!(
                "file_maximum_size {} must exceed file_minimum_size {} by at least {}",
                file_maximum_size, file_minimum_size, FILE_SIZE_FLOOR
            )));
        }
        if !(minimum_use_ratio > 0.0 && minimum_use_ratio <= 1.0) {
            return Err(Error::configuration(format!(
                "minimum_use_ratio {} is not in (0, 1]",
                minimum_use_ratio
            )));
        }
        Ok(Self {
            file_minimum_size,
            file_maximum_size,
            minimum_use_ratio,
            cleanup_head_file,
        })
    }

    /// Minimum size below which sealed files are dissolved
    pub fn file_minimum_size(&self) -> u64 {
        self.file_minimum_size
    }

    /// Size at which the head file is retired
    pub fn file_maximum_size(&self) -> u64 {
        self.file_maximum_size
    }

    /// Fill ratio below which files are dissolved
    pub fn minimum_use_ratio(&self) -> f64 {
        self.minimum_use_ratio
    }

    /// Whether the head file takes part in housekeeping
    pub fn cleanup_head_file(&self) -> bool {
        self.cleanup_head_file
    }

    /// True when the file reached the maximum size and must stop growing
    pub fn needs_retirement(&self, total_length: u64) -> bool {
        total_length >= self.file_maximum_size
    }

    /// True when housekeeping should copy the file's live records forward
    /// and delete it
    pub fn needs_dissolving(&self, file: &DataFile) -> bool {
        let head = file.is_head();
        if head && !self.cleanup_head_file {
            return false;
        }
        let total = file.total_length();
        (total < self.file_minimum_size && !head)
            || file.data_fill_ratio() < self.minimum_use_ratio
            || (total > self.file_maximum_size && !file.is_gapless_single_entity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn sealed(entities: &[u64], gaps: u64) -> DataFile {
        let mut file = DataFile::new_head(1, PathBuf::from("/x"));
        for length in entities {
            file.add_entity(*length);
        }
        file.add_gap_bytes(gaps);
        file.set_state(crate::data_file::FileState::Sealed);
        file
    }

    fn small() -> DataFileEvaluator {
        DataFileEvaluator::new(2048, 8192, 0.75, true).unwrap()
    }

    #[test]
    fn test_validation() {
        assert!(DataFileEvaluator::new(512, 8192, 0.5, true).is_err());
        assert!(DataFileEvaluator::new(4096, 4096, 0.5, true).is_err());
        assert!(DataFileEvaluator::new(4096, 5119, 0.5, true).is_err());
        assert!(DataFileEvaluator::new(4096, 5120, 0.5, true).is_ok());
        assert!(DataFileEvaluator::new(4096, 8192, 0.0, true).is_err());
        assert!(DataFileEvaluator::new(4096, 8192, 1.5, true).is_err());
        assert!(DataFileEvaluator::new(4096, 8192, 1.0, true).is_ok());
    }

    #[test]
    fn test_defaults() {
        let evaluator = DataFileEvaluator::default();
        assert_eq!(evaluator.file_minimum_size(), 1024 * 1024);
        assert_eq!(evaluator.file_maximum_size(), 8 * 1024 * 1024);
        assert_eq!(evaluator.minimum_use_ratio(), 0.75);
        assert!(evaluator.cleanup_head_file());
    }

    #[test]
    fn test_retirement_threshold() {
        let evaluator = small();
        assert!(!evaluator.needs_retirement(8191));
        assert!(evaluator.needs_retirement(8192));
    }

    #[test]
    fn test_low_fill_ratio_dissolves() {
        let evaluator = small();
        assert!(evaluator.needs_dissolving(&sealed(&[400], 3600)));
        assert!(!evaluator.needs_dissolving(&sealed(&[3600], 400)));
    }

    #[test]
    fn test_small_sealed_file_dissolves() {
        let evaluator = small();
        assert!(evaluator.needs_dissolving(&sealed(&[1000], 0)));
    }

    #[test]
    fn test_oversized_single_record_is_kept() {
        let evaluator = small();
        assert!(!evaluator.needs_dissolving(&sealed(&[20_000], 0)));
        assert!(evaluator.needs_dissolving(&sealed(&[10_000, 10_000], 0)));
    }

    #[test]
    fn test_head_file() {
        let mut head = DataFile::new_head(1, PathBuf::from("/x"));
        head.add_entity(100);
        // small heads are not dissolved for being small
        assert!(!small().needs_dissolving(&head));
        head.add_gap_bytes(900);
        assert!(small().needs_dissolving(&head));
        let keep_head = DataFileEvaluator::new(2048, 8192, 0.75, false).unwrap();
        assert!(!keep_head.needs_dissolving(&head));
    }
}
