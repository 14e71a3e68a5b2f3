//! Inventory snapshots and operation reports

use crate::data_file::{DataFile, FileState};

/// Snapshot of one data file
#[derive(Debug, Clone, PartialEq)]
pub struct FileStatistics {
    /// File number within its channel
    pub number: u64,
    /// All bytes, live and gap
    pub total_length: u64,
    /// Bytes of live records
    pub data_length: u64,
    /// `data_length / total_length`
    pub fill_ratio: f64,
    /// Live records
    pub entity_count: u64,
    /// True for the channel's head file
    pub is_head: bool,
    /// Life-cycle state
    pub state: FileState,
}

impl From<&DataFile> for FileStatistics {
    fn from(file: &DataFile) -> Self {
        Self {
            number: file.number(),
            total_length: file.total_length(),
            data_length: file.data_length(),
            fill_ratio: file.data_fill_ratio(),
            entity_count: file.entity_count(),
            is_head: file.is_head(),
            state: file.state(),
        }
    }
}

/// Snapshot of one channel's inventory
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStatistics {
    /// Channel index
    pub channel: usize,
    /// Files in number order
    pub files: Vec<FileStatistics>,
}

impl ChannelStatistics {
    /// Sum of all file lengths
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.total_length).sum()
    }

    /// Sum of live bytes
    pub fn data_length(&self) -> u64 {
        self.files.iter().map(|f| f.data_length).sum()
    }

    /// Live records in the channel
    pub fn entity_count(&self) -> u64 {
        self.files.iter().map(|f| f.entity_count).sum()
    }
}

/// Snapshot of every channel
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StorageStatistics {
    /// Channels in index order
    pub channels: Vec<ChannelStatistics>,
}

impl StorageStatistics {
    /// Number of data files across all channels
    pub fn file_count(&self) -> usize {
        self.channels.iter().map(|c| c.files.len()).sum()
    }

    /// Live records across all channels
    pub fn entity_count(&self) -> u64 {
        self.channels.iter().map(|c| c.entity_count()).sum()
    }

    /// Sum of all file lengths
    pub fn total_length(&self) -> u64 {
        self.channels.iter().map(|c| c.total_length()).sum()
    }

    /// Sum of live bytes
    pub fn data_length(&self) -> u64 {
        self.channels.iter().map(|c| c.data_length()).sum()
    }
}

/// Outcome of a commit across channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    /// Records appended
    pub records: u64,
    /// Bytes appended
    pub bytes: u64,
    /// Older versions turned into gaps
    pub superseded: u64,
}

impl CommitReport {
    /// Add another channel's numbers
    pub fn merge(&mut self, other: CommitReport) {
        self.records += other.records;
        self.bytes += other.bytes;
        self.superseded += other.superseded;
    }
}

/// Outcome of a housekeeping pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HousekeepingReport {
    /// Files evaluated
    pub files_evaluated: u64,
    /// Files drained and deleted
    pub files_dissolved: u64,
    /// Live records copied into the head
    pub entities_moved: u64,
    /// Bytes copied into the head
    pub bytes_moved: u64,
    /// Bytes of deleted files
    pub bytes_reclaimed: u64,
}

impl HousekeepingReport {
    /// Add another pass's numbers
    pub fn merge(&mut self, other: HousekeepingReport) {
        self.files_evaluated += other.files_evaluated;
        self.files_dissolved += other.files_dissolved;
        self.entities_moved += other.entities_moved;
        self.bytes_moved += other.bytes_moved;
        self.bytes_reclaimed += other.bytes_reclaimed;
    }

    /// True if nothing was dissolved
    pub fn is_empty(&self) -> bool {
        self.files_dissolved == 0
    }
}
