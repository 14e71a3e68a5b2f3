//! Storage channels and data files for tessera
//!
//! This crate owns everything below the record codec:
//! - [`fs`]: the file-system collaborator (local disk, in-memory)
//! - [`layout`]: where every file of a storage directory lives
//! - [`data_file`] / [`evaluator`]: per-file accounting and the rollover and
//!   consolidation thresholds
//! - [`channel`]: one partition of the object id space and its data files
//! - [`manager`]: all channels plus one writer thread per channel
//! - [`id_file`], [`meta`], [`lock`]: id high-water marks, dataset metadata,
//!   the exclusive directory lock
//!
//! # Concurrency
//!
//! Channels never coordinate with each other. Within a channel, writes are
//! serialized on its worker thread and reads share the channel's `RwLock`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod channel;
pub mod context;
pub mod data_file;
pub mod evaluator;
pub mod fs;
pub mod id_file;
pub mod layout;
pub mod lock;
pub mod manager;
pub mod meta;
pub mod statistics;

pub use channel::{EntityLocation, StorageChannel};
pub use context::{channel_of, validate_channel_count, HousekeepingOptions, StorageContext};
pub use data_file::{DataFile, FileState};
pub use evaluator::DataFileEvaluator;
pub use fs::{FileSystem, LocalFileSystem, MemoryFileSystem};
pub use id_file::{FileIdProvider, DEFAULT_ID_BATCH_SIZE};
pub use layout::StorageLayout;
pub use lock::DirectoryLock;
pub use manager::{ChannelManager, WriteBatch};
pub use meta::StorageMeta;
pub use statistics::{
    ChannelStatistics, CommitReport, FileStatistics, HousekeepingReport, StorageStatistics,
};
