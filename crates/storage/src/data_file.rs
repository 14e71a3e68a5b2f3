//! Data file inventory entries
//!
//! ```text
//! Head ──rollover──> Sealed ──housekeeping──> Consolidating ──> Deleted
//!                       └──────────kept──────> Retained
//! ```
//!
//! Exactly one file per channel is the head. Sealed and retained files only
//! lose live bytes (records turn into gaps); they never grow.

use std::fmt;
use std::path::PathBuf;

/// Life-cycle state of a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileState {
    /// Currently appended to
    Head,
    /// Closed for appends
    Sealed,
    /// Live entities are being copied out
    Consolidating,
    /// Drained and removed from disk
    Deleted,
    /// Evaluated by housekeeping and kept
    Retained,
}

impl FileState {
    /// Lower-case name
    pub fn name(&self) -> &'static str {
        match self {
            FileState::Head => "head",
            FileState::Sealed => "sealed",
            FileState::Consolidating => "consolidating",
            FileState::Deleted => "deleted",
            FileState::Retained => "retained",
        }
    }
}

impl fmt::Display for FileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One data file of a channel
#[derive(Debug, Clone)]
pub struct DataFile {
    number: u64,
    path: PathBuf,
    total_length: u64,
    data_length: u64,
    entity_count: u64,
    state: FileState,
}

impl DataFile {
    /// Fresh, empty head file
    pub fn new_head(number: u64, path: PathBuf) -> Self {
        Self {
            number,
            path,
            total_length: 0,
            data_length: 0,
            entity_count: 0,
            state: FileState::Head,
        }
    }

    /// Existing sealed file, lengths filled in by the startup scan
    pub fn sealed(number: u64, path: PathBuf, total_length: u64) -> Self {
        Self {
            number,
            path,
            total_length,
            data_length: 0,
            entity_count: 0,
            state: FileState::Sealed,
        }
    }

    /// Monotonic file number within the channel
    pub fn number(&self) -> u64 {
        self.number
    }

    /// Location on the file system
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// All bytes, live and gap
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Bytes of live records
    pub fn data_length(&self) -> u64 {
        self.data_length
    }

    /// Bytes of gaps and superseded records
    pub fn gap_length(&self) -> u64 {
        self.total_length - self.data_length
    }

    /// Number of live records
    pub fn entity_count(&self) -> u64 {
        self.entity_count
    }

    /// Current state
    pub fn state(&self) -> FileState {
        self.state
    }

    /// True for the channel's head file
    pub fn is_head(&self) -> bool {
        self.state == FileState::Head
    }

    /// `data_length / total_length`; an empty file counts as full
    pub fn data_fill_ratio(&self) -> f64 {
        if self.total_length == 0 {
            1.0
        } else {
            self.data_length as f64 / self.total_length as f64
        }
    }

    /// True if the file holds exactly one record and no gaps
    pub fn is_gapless_single_entity(&self) -> bool {
        self.entity_count == 1 && self.data_length == self.total_length
    }

    pub(crate) fn set_state(&mut self, state: FileState) {
        self.state = state;
    }

    /// Account appended bytes that are not live records (gaps, torn tails)
    pub(crate) fn add_gap_bytes(&mut self, length: u64) {
        self.total_length += length;
    }

    /// Account an appended live record
    pub(crate) fn add_entity(&mut self, length: u64) {
        self.total_length += length;
        self.data_length += length;
        self.entity_count += 1;
    }

    /// Account a live record that became a gap
    pub(crate) fn remove_entity(&mut self, length: u64) {
        self.data_length = self.data_length.saturating_sub(length);
        self.entity_count = self.entity_count.saturating_sub(1);
    }

    /// Account a scanned live record of an existing file
    pub(crate) fn count_existing_entity(&mut self, length: u64) {
        self.data_length += length;
        self.entity_count += 1;
    }
}
