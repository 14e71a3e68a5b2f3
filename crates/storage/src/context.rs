//! Process-wide storage context
//!
//! Built once when a storage is opened and handed to every channel, the
//! manager and the id providers. Nothing in the storage layer discovers its
//! collaborators on its own.

use crate::evaluator::DataFileEvaluator;
use crate::fs::FileSystem;
use crate::layout::StorageLayout;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{Endianness, Error, ObjectId, Result};

/// Largest supported channel count
pub const MAX_CHANNEL_COUNT: usize = 1024;

/// When housekeeping runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HousekeepingOptions {
    /// Idle time after which a channel worker housekeeps; `None` disables it
    pub interval: Option<Duration>,
    /// Housekeep inline after every store on a channel
    pub on_store: bool,
}

/// Shared configuration of one open storage
#[derive(Debug, Clone)]
pub struct StorageContext {
    channel_count: usize,
    endian: Endianness,
    fs: Arc<dyn FileSystem>,
    layout: StorageLayout,
    evaluator: DataFileEvaluator,
    housekeeping: HousekeepingOptions,
}

impl StorageContext {
    /// Validated context
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless `channel_count` is a power of two
    /// in `1..=1024`.
    pub fn new(
        channel_count: usize,
        endian: Endianness,
        fs: Arc<dyn FileSystem>,
        layout: StorageLayout,
        evaluator: DataFileEvaluator,
        housekeeping: HousekeepingOptions,
    ) -> Result<Self> {
        validate_channel_count(channel_count)?;
        Ok(Self {
            channel_count,
            endian,
            fs,
            layout,
            evaluator,
            housekeeping,
        })
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Byte order of every record in the dataset
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// File-system collaborator
    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    /// Directory layout
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Data file thresholds
    pub fn evaluator(&self) -> &DataFileEvaluator {
        &self.evaluator
    }

    /// Housekeeping schedule
    pub fn housekeeping(&self) -> HousekeepingOptions {
        self.housekeeping
    }

    /// Channel owning `object_id`
    pub fn channel_of(&self, object_id: ObjectId) -> usize {
        channel_of(object_id, self.channel_count)
    }
}

/// Channel owning `object_id` for a power-of-two `channel_count`
#[inline]
pub fn channel_of(object_id: ObjectId, channel_count: usize) -> usize {
    (object_id.as_u64() & (channel_count as u64 - 1)) as usize
}

/// Check that `count` is a power of two in `1..=1024`
pub fn validate_channel_count(count: usize) -> Result<()> {
    if count == 0 || count > MAX_CHANNEL_COUNT || !count.is_power_of_two() {
        return Err(Error::configuration(format!(
            "channel_count {} must be a power of two between 1 and {}",
            count, MAX_CHANNEL_COUNT
        )));
    }
    Ok(())
}
