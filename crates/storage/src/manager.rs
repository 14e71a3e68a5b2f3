//! Channel manager
//!
//! Owns every [`StorageChannel`] and one worker thread per channel. Writes
//! (stores, deletes, housekeeping) are handed to the owning channel's worker,
//! so each channel's files are written by exactly one thread; reads take the
//! channel's read lock directly from the calling thread.
//!
//! ```text
//!            commit(batch)
//!                 │ split by channel_of(object_id)
//!     ┌───────────┼───────────┐
//!     ▼           ▼           ▼
//! worker 0    worker 1    worker 2 ...   (mpsc queue each)
//!     │           │           │
//! channel 0   channel 1   channel 2     (RwLock each)
//!     └───────────┴───────────┘
//!                 │ all replies collected
//!                 ▼
//!           CommitReport / first error
//! ```
//!
//! An idle worker runs housekeeping on its channel after the configured
//! interval. A commit spanning several channels is not atomic: channels that
//! succeeded keep their records when another channel fails.

use crate::channel::StorageChannel;
use crate::context::StorageContext;
use crate::statistics::{CommitReport, HousekeepingReport, StorageStatistics};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_core::{Error, ObjectId, Result};
use tracing::{debug, info, warn};

/// Records of one commit, split into one buffer per channel
#[derive(Debug, Clone)]
pub struct WriteBatch {
    buffers: Vec<Vec<u8>>,
}

impl WriteBatch {
    /// Empty batch for `channel_count` channels
    pub fn new(channel_count: usize) -> Self {
        Self {
            buffers: vec![Vec::new(); channel_count],
        }
    }

    /// Buffer that records of `object_id` must be encoded into
    pub fn buffer_for(&mut self, object_id: ObjectId) -> &mut Vec<u8> {
        let channel = crate::context::channel_of(object_id, self.buffers.len());
        &mut self.buffers[channel]
    }

    /// True if no bytes were added
    pub fn is_empty(&self) -> bool {
        self.buffers.iter().all(Vec::is_empty)
    }

    /// Total bytes across channels
    pub fn byte_count(&self) -> u64 {
        self.buffers.iter().map(|b| b.len() as u64).sum()
    }

    /// Drop all buffered records
    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
    }
}

enum ChannelTask {
    Store {
        records: Vec<u8>,
        reply: Sender<Result<CommitReport>>,
    },
    Delete {
        object_ids: Vec<ObjectId>,
        reply: Sender<Result<u64>>,
    },
    Housekeep {
        reply: Sender<Result<HousekeepingReport>>,
    },
    Shutdown,
}

/// All channels of an open storage plus their worker threads
pub struct ChannelManager {
    ctx: StorageContext,
    channels: Vec<Arc<RwLock<StorageChannel>>>,
    senders: Mutex<Vec<Sender<ChannelTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: AtomicBool,
}

impl ChannelManager {
    /// Open every channel and start its worker
    pub fn open(ctx: StorageContext) -> Result<Self> {
        let mut channels = Vec::with_capacity(ctx.channel_count());
        for index in 0..ctx.channel_count() {
            channels.push(Arc::new(RwLock::new(StorageChannel::open(index, ctx.clone())?)));
        }

        let mut senders = Vec::with_capacity(channels.len());
        let mut workers = Vec::with_capacity(channels.len());
        for (index, channel) in channels.iter().enumerate() {
            let (sender, receiver) = mpsc::channel();
            let channel = Arc::clone(channel);
            let options = ctx.housekeeping();
            let handle = std::thread::Builder::new()
                .name(format!("tessera-channel-{}", index))
                .spawn(move || worker_loop(index, channel, receiver, options))?;
            senders.push(sender);
            workers.push(handle);
        }

        info!(
            target: "tessera::storage",
            root = %ctx.layout().root().display(),
            channels = channels.len(),
            "Started channel workers"
        );
        Ok(Self {
            ctx,
            channels,
            senders: Mutex::new(senders),
            workers: Mutex::new(workers),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Storage context shared by all channels
    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Empty batch sized for this manager
    pub fn new_batch(&self) -> WriteBatch {
        WriteBatch::new(self.channels.len())
    }

    fn send(&self, channel: usize, task: ChannelTask) -> Result<()> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(Error::invalid_operation("storage is shut down"));
        }
        let senders = self.senders.lock();
        let sender = senders.get(channel).ok_or_else(|| Error::ChannelFailure {
            channel,
            message: "no such channel".to_string(),
        })?;
        sender.send(task).map_err(|_| Error::ChannelFailure {
            channel,
            message: "worker is not running".to_string(),
        })
    }

    fn await_reply<T>(channel: usize, reply: &Receiver<Result<T>>) -> Result<T> {
        reply.recv().map_err(|_| Error::ChannelFailure {
            channel,
            message: "worker stopped before replying".to_string(),
        })?
    }

    /// Write every channel's part of `batch` and wait for all of them
    ///
    /// Returns the first failure after all channels have answered.
    pub fn commit(&self, batch: WriteBatch) -> Result<CommitReport> {
        let mut pending = Vec::new();
        let mut failure = None;
        for (channel, records) in batch.buffers.into_iter().enumerate() {
            if records.is_empty() {
                continue;
            }
            let (reply, receiver) = mpsc::channel();
            match self.send(channel, ChannelTask::Store { records, reply }) {
                Ok(()) => pending.push((channel, receiver)),
                Err(e) => {
                    warn!(target: "tessera::storage", channel, error = %e, "Channel commit not sent");
                    failure.get_or_insert(e);
                }
            }
        }

        let mut report = CommitReport::default();
        for (channel, receiver) in pending {
            match Self::await_reply(channel, &receiver) {
                Ok(part) => report.merge(part),
                Err(e) => {
                    warn!(target: "tessera::storage", channel, error = %e, "Channel commit failed");
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => {
                debug!(
                    target: "tessera::storage",
                    records = report.records,
                    bytes = report.bytes,
                    "Committed batch"
                );
                Ok(report)
            }
        }
    }

    /// Delete the live records of `object_ids`
    ///
    /// Returns how many records existed.
    pub fn delete(&self, object_ids: &[ObjectId]) -> Result<u64> {
        let mut grouped: Vec<Vec<ObjectId>> = vec![Vec::new(); self.channels.len()];
        for &object_id in object_ids {
            grouped[self.ctx.channel_of(object_id)].push(object_id);
        }
        let mut pending = Vec::new();
        for (channel, object_ids) in grouped.into_iter().enumerate() {
            if object_ids.is_empty() {
                continue;
            }
            let (reply, receiver) = mpsc::channel();
            self.send(channel, ChannelTask::Delete { object_ids, reply })?;
            pending.push((channel, receiver));
        }
        let mut deleted = 0;
        let mut failure = None;
        for (channel, receiver) in pending {
            match Self::await_reply(channel, &receiver) {
                Ok(count) => deleted += count,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        failure.map_or(Ok(deleted), Err)
    }

    /// Run a housekeeping pass on every channel and wait for all of them
    pub fn issue_full_housekeeping(&self) -> Result<HousekeepingReport> {
        let mut pending = Vec::with_capacity(self.channels.len());
        for channel in 0..self.channels.len() {
            let (reply, receiver) = mpsc::channel();
            self.send(channel, ChannelTask::Housekeep { reply })?;
            pending.push((channel, receiver));
        }
        let mut report = HousekeepingReport::default();
        for (channel, receiver) in pending {
            report.merge(Self::await_reply(channel, &receiver)?);
        }
        Ok(report)
    }

    /// Raw record bytes of `object_id`, if stored
    pub fn read_entity(&self, object_id: ObjectId) -> Result<Option<Vec<u8>>> {
        self.channels[self.ctx.channel_of(object_id)]
            .read()
            .read_entity(object_id)
    }

    /// True if a live record exists for `object_id`
    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.channels[self.ctx.channel_of(object_id)]
            .read()
            .contains(object_id)
    }

    /// Object ids of all live records, channel by channel
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.channels
            .iter()
            .flat_map(|channel| channel.read().object_ids())
            .collect()
    }

    /// Highest object id stored in any channel
    pub fn max_object_id(&self) -> ObjectId {
        self.channels
            .iter()
            .map(|channel| channel.read().max_object_id())
            .max()
            .unwrap_or(ObjectId::NULL)
    }

    /// Inventory snapshot of every channel
    pub fn statistics(&self) -> StorageStatistics {
        StorageStatistics {
            channels: self
                .channels
                .iter()
                .map(|channel| channel.read().statistics())
                .collect(),
        }
    }

    /// Copy the metadata files and every data file into `target_root`
    ///
    /// All channels are read-locked for the duration, so no store is
    /// half-copied.
    pub fn backup_to(&self, target_root: &Path) -> Result<usize> {
        let guards: Vec<_> = self.channels.iter().map(|c| c.read()).collect();
        let fs = self.ctx.fs();
        fs.create_dir_all(target_root)?;
        let mut copied = 0;
        for path in self.ctx.layout().metadata_files() {
            if fs.exists(&path) {
                fs.copy_to(&path, target_root)?;
                copied += 1;
            }
        }
        for channel in &guards {
            copied += channel.backup_to(target_root)?;
        }
        info!(
            target: "tessera::storage",
            target_root = %target_root.display(),
            files = copied,
            "Backup complete"
        );
        Ok(copied)
    }

    /// Stop all workers after their queued tasks
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for sender in self.senders.lock().iter() {
            let _ = sender.send(ChannelTask::Shutdown);
        }
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                warn!(target: "tessera::storage", "Channel worker panicked");
            }
        }
        info!(target: "tessera::storage", "Channel workers stopped");
    }

    /// True once [`ChannelManager::shutdown`] ran
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ChannelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelManager")
            .field("root", &self.ctx.layout().root())
            .field("channels", &self.channels.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

fn worker_loop(
    index: usize,
    channel: Arc<RwLock<StorageChannel>>,
    tasks: Receiver<ChannelTask>,
    options: crate::context::HousekeepingOptions,
) {
    loop {
        let task = match options.interval {
            Some(interval) => match tasks.recv_timeout(interval) {
                Ok(task) => task,
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = channel.write().housekeep() {
                        warn!(
                            target: "tessera::housekeeping",
                            channel = index,
                            error = %e,
                            "Idle housekeeping failed"
                        );
                    }
                    continue;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match tasks.recv() {
                Ok(task) => task,
                Err(_) => break,
            },
        };

        match task {
            ChannelTask::Store { records, reply } => {
                let mut guard = channel.write();
                let result = guard.store(&records);
                if result.is_ok() && options.on_store {
                    // the records are on disk, so the store reports success
                    if let Err(e) = guard.housekeep() {
                        warn!(
                            target: "tessera::housekeeping",
                            channel = index,
                            error = %e,
                            "Housekeeping after store failed"
                        );
                    }
                }
                drop(guard);
                let _ = reply.send(result);
            }
            ChannelTask::Delete { object_ids, reply } => {
                let mut guard = channel.write();
                let result = object_ids.iter().try_fold(0u64, |count, &object_id| {
                    guard.delete(object_id).map(|found| count + u64::from(found))
                });
                drop(guard);
                let _ = reply.send(result);
            }
            ChannelTask::Housekeep { reply } => {
                let result = channel.write().housekeep();
                let _ = reply.send(result);
            }
            ChannelTask::Shutdown => break,
        }
    }
    debug!(target: "tessera::storage", channel = index, "Channel worker exiting");
}
