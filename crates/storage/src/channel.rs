//! Storage channel
//!
//! One channel owns one partition of the object id space: its directory of
//! data files, the index of where each live record sits, and the head file
//! all appends go to.
//!
//! ```text
//! channel_2/
//!   channel_2_4.dat   retained   [rec][gap][rec][rec][gap]...
//!   channel_2_7.dat   sealed     [gap][gap][rec]...
//!   channel_2_9.dat   head       [rec][rec][rec]  <- appends
//! ```
//!
//! Storing an object id again appends the new record and rewrites the length
//! field of the previous record as a gap marker, so every file can be scanned
//! front to back and the live data of a file is always what housekeeping
//! needs to copy forward.

use crate::context::StorageContext;
use crate::data_file::{DataFile, FileState};
use crate::statistics::{ChannelStatistics, CommitReport, FileStatistics, HousekeepingReport};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tessera_codec::{gap_marker, EntityScanner, RecordHeader, ScanEntry};
use tessera_core::{Error, ObjectId, Result, TypeId};
use tracing::{debug, info, trace, warn};

/// Position of a live record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    /// Data file number
    pub file_number: u64,
    /// Byte offset of the record in the file
    pub offset: u64,
    /// Record length
    pub length: u64,
    /// Type id from the record header
    pub type_id: TypeId,
}

/// One storage channel: data files plus the live-record index
#[derive(Debug)]
pub struct StorageChannel {
    index: usize,
    ctx: StorageContext,
    files: BTreeMap<u64, DataFile>,
    head: u64,
    entities: FxHashMap<ObjectId, EntityLocation>,
    max_object_id: ObjectId,
    /// Head file and accounted length to restore after a failed append
    torn_tail: Option<(u64, u64)>,
}

impl StorageChannel {
    /// Open channel `index`, rebuilding the inventory from its data files
    ///
    /// Files are scanned in number order. A record superseded by a later
    /// record of the same object id is turned into a gap. A torn record at
    /// the end of the last file is cut off; any other scan error is fatal.
    pub fn open(index: usize, ctx: StorageContext) -> Result<Self> {
        let dir = ctx.layout().channel_dir(index);
        ctx.fs().create_dir_all(&dir)?;

        let mut numbered: Vec<(u64, PathBuf)> = ctx
            .fs()
            .list(&dir)?
            .into_iter()
            .filter_map(|path| {
                ctx.layout()
                    .parse_data_file(index, &path)
                    .map(|number| (number, path))
            })
            .collect();
        numbered.sort_by_key(|(number, _)| *number);

        let mut channel = Self {
            index,
            ctx,
            files: BTreeMap::new(),
            head: 0,
            entities: FxHashMap::default(),
            max_object_id: ObjectId::NULL,
            torn_tail: None,
        };

        let last = numbered.last().map(|(number, _)| *number);
        for (number, path) in numbered {
            channel.scan_file(number, path, Some(number) == last)?;
        }

        match last {
            Some(number) => {
                channel.head = number;
                if let Some(file) = channel.files.get_mut(&number) {
                    file.set_state(FileState::Head);
                }
            }
            None => {
                let path = channel.ctx.layout().data_file(index, 1);
                channel.ctx.fs().append(&path, &[])?;
                channel.files.insert(1, DataFile::new_head(1, path));
                channel.head = 1;
            }
        }

        info!(
            target: "tessera::channel",
            channel = index,
            files = channel.files.len(),
            entities = channel.entities.len(),
            head = channel.head,
            "Opened channel"
        );
        Ok(channel)
    }

    fn scan_file(&mut self, number: u64, path: PathBuf, is_last: bool) -> Result<()> {
        let endian = self.ctx.endian();
        let bytes = self.ctx.fs().read_all(&path)?;
        let mut total = bytes.len() as u64;

        let mut scanner = EntityScanner::new(&bytes, endian, self.index, number);
        let mut live: Vec<(ObjectId, EntityLocation)> = Vec::new();
        loop {
            let entry = match scanner.next() {
                None => break,
                Some(Ok(entry)) => entry,
                Some(Err(Error::TruncatedRecord { offset, .. })) if is_last => {
                    warn!(
                        target: "tessera::channel",
                        channel = self.index,
                        file_number = number,
                        offset,
                        "Cutting off torn record at end of last data file"
                    );
                    self.ctx.fs().truncate(&path, offset)?;
                    total = offset;
                    break;
                }
                Some(Err(e)) => return Err(e),
            };
            if let ScanEntry::Entity { offset, header } = entry {
                live.push((
                    header.object_id,
                    EntityLocation {
                        file_number: number,
                        offset,
                        length: header.length,
                        type_id: header.type_id,
                    },
                ));
            }
        }

        self.files
            .insert(number, DataFile::sealed(number, path, total));
        for (object_id, location) in live {
            if let Some(file) = self.files.get_mut(&number) {
                file.count_existing_entity(location.length);
            }
            self.index_entity(object_id, location)?;
        }
        Ok(())
    }

    /// Channel index
    pub fn index(&self) -> usize {
        self.index
    }

    /// Shared storage context
    pub fn context(&self) -> &StorageContext {
        &self.ctx
    }

    /// Number of the current head file
    pub fn head_number(&self) -> u64 {
        self.head
    }

    /// The current head file
    pub fn head_file(&self) -> Option<&DataFile> {
        self.files.get(&self.head)
    }

    /// Data file by number
    pub fn file(&self, number: u64) -> Option<&DataFile> {
        self.files.get(&number)
    }

    /// All data files in number order
    pub fn files(&self) -> impl Iterator<Item = &DataFile> {
        self.files.values()
    }

    /// Location of the live record of `object_id`
    pub fn location(&self, object_id: ObjectId) -> Option<EntityLocation> {
        self.entities.get(&object_id).copied()
    }

    /// True if a live record exists for `object_id`
    pub fn contains(&self, object_id: ObjectId) -> bool {
        self.entities.contains_key(&object_id)
    }

    /// Number of live records
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Highest object id ever seen in this channel
    pub fn max_object_id(&self) -> ObjectId {
        self.max_object_id
    }

    /// Object ids of all live records
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.entities.keys().copied().collect()
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Append a buffer of complete records to the head file
    ///
    /// The buffer is validated before anything is written. Previous versions
    /// of the stored object ids become gaps. The head is rolled over before
    /// the append if it is already at the maximum size, and after it if the
    /// append pushed it there.
    pub fn store(&mut self, records: &[u8]) -> Result<CommitReport> {
        if records.is_empty() {
            return Ok(CommitReport::default());
        }
        let entries: Vec<ScanEntry> =
            EntityScanner::new(records, self.ctx.endian(), self.index, self.head)
                .collect::<Result<_>>()?;

        self.repair_torn_tail()?;
        if self.head_needs_retirement() {
            self.create_next_data_file()?;
        }
        let report = self.append_records(records, &entries)?;
        if self.head_needs_retirement() {
            self.create_next_data_file()?;
        }

        debug!(
            target: "tessera::channel",
            channel = self.index,
            records = report.records,
            bytes = report.bytes,
            superseded = report.superseded,
            "Stored batch"
        );
        Ok(report)
    }

    fn head_needs_retirement(&self) -> bool {
        self.head_file()
            .map(|f| self.ctx.evaluator().needs_retirement(f.total_length()))
            .unwrap_or(false)
    }

    fn append_records(&mut self, records: &[u8], entries: &[ScanEntry]) -> Result<CommitReport> {
        let head = self.head;
        let (path, base) = {
            let file = self.files.get(&head).ok_or_else(|| self.missing_file(head))?;
            (file.path().clone(), file.total_length())
        };
        if let Err(e) = self.write(&path, &[records]) {
            self.discard_partial_append(head, &path, base);
            return Err(e);
        }

        let mut report = CommitReport {
            bytes: records.len() as u64,
            ..CommitReport::default()
        };
        for entry in entries {
            match *entry {
                ScanEntry::Entity { offset, header } => {
                    let location = EntityLocation {
                        file_number: head,
                        offset: base + offset,
                        length: header.length,
                        type_id: header.type_id,
                    };
                    if let Some(file) = self.files.get_mut(&head) {
                        file.add_entity(header.length);
                    }
                    if self.index_entity(header.object_id, location)? {
                        report.superseded += 1;
                    }
                    report.records += 1;
                    trace!(
                        target: "tessera::channel",
                        channel = self.index,
                        object_id = %header.object_id,
                        type_id = %header.type_id,
                        file_number = head,
                        offset = location.offset,
                        "Appended record"
                    );
                }
                ScanEntry::Gap { length, .. } => {
                    if let Some(file) = self.files.get_mut(&head) {
                        file.add_gap_bytes(length);
                    }
                }
            }
        }
        Ok(report)
    }

    /// Cut bytes of a failed append off the head file
    ///
    /// If the file cannot be truncated now, writes to this channel are
    /// refused until [`StorageChannel::repair_torn_tail`] succeeds.
    fn discard_partial_append(&mut self, file_number: u64, path: &Path, length: u64) {
        match self.ctx.fs().truncate(path, length) {
            Ok(()) => {
                warn!(
                    target: "tessera::channel",
                    channel = self.index,
                    file_number,
                    length,
                    "Discarded partial append"
                );
            }
            Err(e) => {
                warn!(
                    target: "tessera::channel",
                    channel = self.index,
                    file_number,
                    length,
                    error = %e,
                    "Could not discard partial append, channel refuses writes until repaired"
                );
                self.torn_tail = Some((file_number, length));
            }
        }
    }

    /// Retry cutting off a failed append left behind by an earlier store
    fn repair_torn_tail(&mut self) -> Result<()> {
        let Some((file_number, length)) = self.torn_tail else {
            return Ok(());
        };
        let path = self
            .files
            .get(&file_number)
            .ok_or_else(|| self.missing_file(file_number))?
            .path()
            .clone();
        self.ctx.fs().truncate(&path, length).map_err(|e| Error::ChannelFailure {
            channel: self.index,
            message: format!(
                "data file {} still holds a partial append: {}",
                file_number, e
            ),
        })?;
        self.torn_tail = None;
        info!(
            target: "tessera::channel",
            channel = self.index,
            file_number,
            length,
            "Repaired partial append"
        );
        Ok(())
    }

    /// Write `buffers` fully to the end of `path`
    ///
    /// A short write is a failure of the operation, never accepted silently.
    fn write(&self, path: &Path, buffers: &[&[u8]]) -> Result<u64> {
        let expected: u64 = buffers.iter().map(|b| b.len() as u64).sum();
        let written = self.ctx.fs().append(path, buffers)?;
        if written != expected {
            return Err(Error::ChannelFailure {
                channel: self.index,
                message: format!(
                    "short write to '{}': {} of {} bytes",
                    path.display(),
                    written,
                    expected
                ),
            });
        }
        Ok(written)
    }

    /// Record a live location, gapping any previous one
    ///
    /// Returns true if an older version was superseded.
    fn index_entity(&mut self, object_id: ObjectId, location: EntityLocation) -> Result<bool> {
        if object_id > self.max_object_id {
            self.max_object_id = object_id;
        }
        match self.entities.insert(object_id, location) {
            Some(previous) => {
                self.gap_location(previous)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Turn a record into a gap in place
    ///
    /// Records of a file being consolidated are only accounted: the file is
    /// deleted once drained.
    fn gap_location(&mut self, location: EntityLocation) -> Result<()> {
        let endian = self.ctx.endian();
        let file = self
            .files
            .get_mut(&location.file_number)
            .ok_or_else(|| Error::ChannelFailure {
                channel: self.index,
                message: format!("data file {} is not in the inventory", location.file_number),
            })?;
        if file.state() != FileState::Consolidating {
            self.ctx.fs().write_at(
                file.path(),
                location.offset,
                &gap_marker(location.length, endian),
            )?;
        }
        file.remove_entity(location.length);
        Ok(())
    }

    /// Delete the live record of `object_id`
    ///
    /// Returns false if there was none.
    pub fn delete(&mut self, object_id: ObjectId) -> Result<bool> {
        match self.entities.remove(&object_id) {
            Some(location) => {
                self.gap_location(location)?;
                trace!(
                    target: "tessera::channel",
                    channel = self.index,
                    object_id = %object_id,
                    "Deleted record"
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Seal the head file and start the next one
    pub fn create_next_data_file(&mut self) -> Result<&DataFile> {
        let number = self.files.keys().next_back().copied().unwrap_or(0) + 1;
        let path = self.ctx.layout().data_file(self.index, number);
        self.ctx.fs().append(&path, &[])?;

        let sealed = self.head;
        if let Some(old) = self.files.get_mut(&sealed) {
            old.set_state(FileState::Sealed);
        }
        self.files.insert(number, DataFile::new_head(number, path));
        self.head = number;

        info!(
            target: "tessera::channel",
            channel = self.index,
            sealed,
            head = number,
            "Rolled over to new head file"
        );
        self.files.get(&number).ok_or_else(|| self.missing_file(number))
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read `length` bytes at `position` of data file `file_number`
    ///
    /// Reading past the file's accounted length is a consistency error.
    pub fn read(&self, file_number: u64, position: u64, length: u64) -> Result<Vec<u8>> {
        let file = self
            .files
            .get(&file_number)
            .ok_or_else(|| self.missing_file(file_number))?;
        if position + length > file.total_length() {
            return Err(Error::ReadBeyondFile {
                channel: self.index,
                file_number,
                position,
                length,
                file_length: file.total_length(),
            });
        }
        let mut buf = vec![0u8; length as usize];
        self.ctx.fs().read_at(file.path(), position, &mut buf)?;
        Ok(buf)
    }

    /// Raw record bytes of `object_id`, if stored
    pub fn read_entity(&self, object_id: ObjectId) -> Result<Option<Vec<u8>>> {
        let location = match self.entities.get(&object_id) {
            Some(location) => *location,
            None => return Ok(None),
        };
        let bytes = self.read(location.file_number, location.offset, location.length)?;
        let header = RecordHeader::read(&bytes, self.ctx.endian())?;
        if header.object_id != object_id || header.length != location.length {
            return Err(Error::ObjectIdMismatch {
                expected: object_id,
                found: header.object_id,
                channel: self.index,
                file_number: location.file_number,
                offset: location.offset,
            });
        }
        Ok(Some(bytes))
    }

    // ========================================================================
    // Housekeeping
    // ========================================================================

    /// Evaluate every file and dissolve those the evaluator selects
    ///
    /// Files that are kept are marked retained.
    pub fn housekeep(&mut self) -> Result<HousekeepingReport> {
        self.repair_torn_tail()?;
        let mut report = HousekeepingReport::default();
        let numbers: Vec<u64> = self.files.keys().copied().collect();
        for number in numbers {
            let dissolve = match self.files.get(&number) {
                Some(file) => self.ctx.evaluator().needs_dissolving(file),
                None => continue,
            };
            report.files_evaluated += 1;
            if dissolve {
                report.merge(self.consolidate_file(number)?);
            } else if let Some(file) = self.files.get_mut(&number) {
                if file.state() == FileState::Sealed {
                    file.set_state(FileState::Retained);
                }
            }
        }
        if !report.is_empty() {
            info!(
                target: "tessera::housekeeping",
                channel = self.index,
                dissolved = report.files_dissolved,
                moved = report.entities_moved,
                reclaimed = report.bytes_reclaimed,
                "Housekeeping pass"
            );
        }
        Ok(report)
    }

    /// Copy the live records of file `number` into the head and delete it
    ///
    /// The head itself is consolidated by rolling over first.
    pub fn consolidate_file(&mut self, number: u64) -> Result<HousekeepingReport> {
        if number == self.head {
            self.create_next_data_file()?;
        }
        let (path, reclaimed) = {
            let file = self
                .files
                .get_mut(&number)
                .ok_or_else(|| Error::ChannelFailure {
                    channel: self.index,
                    message: format!("data file {} is not in the inventory", number),
                })?;
            file.set_state(FileState::Consolidating);
            (file.path().clone(), file.total_length())
        };

        let bytes = self.ctx.fs().read_all(&path)?;
        let mut live: Vec<RecordHeader> = Vec::new();
        let mut offsets = Vec::new();
        for entry in EntityScanner::new(&bytes, self.ctx.endian(), self.index, number) {
            if let ScanEntry::Entity { offset, header } = entry? {
                let current = self.entities.get(&header.object_id);
                if current.map_or(false, |l| l.file_number == number && l.offset == offset) {
                    live.push(header);
                    offsets.push(offset);
                }
            }
        }

        // Transfer in chunks that fit the head; only a single record larger
        // than the maximum file size may overfill an empty head.
        let maximum = self.ctx.evaluator().file_maximum_size();
        let mut chunk = Vec::new();
        let mut entries = Vec::new();
        for (header, offset) in live.iter().zip(offsets) {
            let head_length = self.head_file().map_or(0, |f| f.total_length());
            let free = maximum.saturating_sub(head_length + chunk.len() as u64);
            if header.length > free {
                if !chunk.is_empty() {
                    self.append_records(&chunk, &entries)?;
                    chunk.clear();
                    entries.clear();
                }
                if self.head_file().map_or(0, |f| f.total_length()) != 0 {
                    self.create_next_data_file()?;
                }
            }
            entries.push(ScanEntry::Entity {
                offset: chunk.len() as u64,
                header: *header,
            });
            let end = (offset + header.length) as usize;
            chunk.extend_from_slice(&bytes[offset as usize..end]);
        }
        if !chunk.is_empty() {
            self.append_records(&chunk, &entries)?;
        }
        if self.head_needs_retirement() {
            self.create_next_data_file()?;
        }

        let moved = live.len() as u64;
        let report = HousekeepingReport {
            files_dissolved: 1,
            entities_moved: moved,
            bytes_moved: live.iter().map(|h| h.length).sum(),
            bytes_reclaimed: reclaimed,
            ..HousekeepingReport::default()
        };

        let remaining = self.files.get(&number).map_or(0, |f| f.entity_count());
        if remaining != 0 {
            return Err(Error::ChannelFailure {
                channel: self.index,
                message: format!(
                    "data file {} still holds {} records after consolidation",
                    number, remaining
                ),
            });
        }
        self.ctx.fs().delete(&path)?;
        if let Some(mut file) = self.files.remove(&number) {
            file.set_state(FileState::Deleted);
        }

        debug!(
            target: "tessera::housekeeping",
            channel = self.index,
            file_number = number,
            entities = moved,
            reclaimed,
            "Dissolved data file"
        );
        Ok(report)
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Snapshot of the inventory
    pub fn statistics(&self) -> ChannelStatistics {
        ChannelStatistics {
            channel: self.index,
            files: self.files.values().map(FileStatistics::from).collect(),
        }
    }

    /// Copy every data file into the same layout under `target_root`
    pub fn backup_to(&self, target_root: &Path) -> Result<usize> {
        let target = crate::layout::StorageLayout::new(target_root).channel_dir(self.index);
        self.ctx.fs().create_dir_all(&target)?;
        for file in self.files.values() {
            self.ctx.fs().copy_to(file.path(), &target)?;
        }
        Ok(self.files.len())
    }

    fn missing_file(&self, number: u64) -> Error {
        Error::ChannelFailure {
            channel: self.index,
            message: format!("data file {} is not in the inventory", number),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HousekeepingOptions;
    use crate::evaluator::DataFileEvaluator;
    use crate::fs::{FileSystem, MemoryFileSystem};
    use crate::layout::StorageLayout;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tessera_core::Endianness;

    fn context(fs: Arc<dyn FileSystem>) -> StorageContext {
        StorageContext::new(
            1,
            Endianness::Little,
            fs,
            StorageLayout::new("/store"),
            DataFileEvaluator::new(1024, 4096, 0.5, true).unwrap(),
            HousekeepingOptions::default(),
        )
        .unwrap()
    }

    /// Memory file system whose next append can be torn and whose truncates can fail
    #[derive(Debug, Default)]
    struct FaultyFileSystem {
        inner: MemoryFileSystem,
        tear_next_append: AtomicBool,
        fail_truncate: AtomicBool,
    }

    impl FaultyFileSystem {
        fn device_error(path: &Path) -> Error {
            Error::file_io(path, io::Error::new(io::ErrorKind::Other, "device full"))
        }
    }

    impl FileSystem for FaultyFileSystem {
        fn read_at(&self, path: &Path, offset: u64, buf: &mut [u8]) -> Result<()> {
            self.inner.read_at(path, offset, buf)
        }

        fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
            self.inner.read_all(path)
        }

        fn append(&self, path: &Path, buffers: &[&[u8]]) -> Result<u64> {
            if self.tear_next_append.swap(false, Ordering::SeqCst) {
                let bytes = buffers.concat();
                self.inner.append(path, &[&bytes[..bytes.len() / 2]])?;
                return Err(Self::device_error(path));
            }
            self.inner.append(path, buffers)
        }

        fn write_at(&self, path: &Path, offset: u64, bytes: &[u8]) -> Result<()> {
            self.inner.write_at(path, offset, bytes)
        }

        fn replace(&self, path: &Path, bytes: &[u8]) -> Result<()> {
            self.inner.replace(path, bytes)
        }

        fn file_size(&self, path: &Path) -> Result<u64> {
            self.inner.file_size(path)
        }

        fn truncate(&self, path: &Path, length: u64) -> Result<()> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(Self::device_error(path));
            }
            self.inner.truncate(path, length)
        }

        fn delete(&self, path: &Path) -> Result<()> {
            self.inner.delete(path)
        }

        fn move_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf> {
            self.inner.move_to(path, target_dir)
        }

        fn copy_to(&self, path: &Path, target_dir: &Path) -> Result<PathBuf> {
            self.inner.copy_to(path, target_dir)
        }

        fn create_dir_all(&self, dir: &Path) -> Result<()> {
            self.inner.create_dir_all(dir)
        }

        fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
            self.inner.list(dir)
        }

        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
    }

    /// A record of `length` bytes with a zero payload
    fn record(object_id: u64, length: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; length as usize];
        RecordHeader {
            length,
            type_id: TypeId::new(1_000_001),
            object_id: ObjectId::new(object_id),
        }
        .write(&mut bytes, Endianness::Little);
        bytes
    }

    #[test]
    fn test_fresh_channel_has_head_file_one() {
        let fs = Arc::new(MemoryFileSystem::new());
        let channel = StorageChannel::open(0, context(fs.clone())).unwrap();
        assert_eq!(channel.head_number(), 1);
        assert!(fs.exists(&PathBuf::from("/store/channel_0/channel_0_1.dat")));
        assert_eq!(channel.entity_count(), 0);
    }

    #[test]
    fn test_store_and_read() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        let mut batch = record(10, 40);
        batch.extend(record(11, 24));
        let report = channel.store(&batch).unwrap();
        assert_eq!(report.records, 2);
        assert_eq!(report.bytes, 64);

        let bytes = channel.read_entity(ObjectId::new(11)).unwrap().unwrap();
        assert_eq!(bytes, record(11, 24));
        assert!(channel.read_entity(ObjectId::new(12)).unwrap().is_none());
        assert_eq!(channel.max_object_id(), ObjectId::new(11));
    }

    #[test]
    fn test_restore_gaps_previous_version() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs.clone())).unwrap();
        channel.store(&record(10, 40)).unwrap();
        let report = channel.store(&record(10, 48)).unwrap();
        assert_eq!(report.superseded, 1);

        let head = channel.head_file().unwrap();
        assert_eq!(head.total_length(), 88);
        assert_eq!(head.data_length(), 48);
        assert_eq!(head.entity_count(), 1);

        let raw = fs.read_all(head.path()).unwrap();
        assert_eq!(Endianness::Little.read_i64(&raw[..8]), -40);
    }

    #[test]
    fn test_delete_gaps_record() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        channel.store(&record(10, 40)).unwrap();
        assert!(channel.delete(ObjectId::new(10)).unwrap());
        assert!(!channel.delete(ObjectId::new(10)).unwrap());
        assert!(!channel.contains(ObjectId::new(10)));
        assert_eq!(channel.head_file().unwrap().data_fill_ratio(), 0.0);
    }

    #[test]
    fn test_read_beyond_file() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        channel.store(&record(10, 40)).unwrap();
        assert!(matches!(
            channel.read(1, 32, 16),
            Err(Error::ReadBeyondFile { position: 32, length: 16, file_length: 40, .. })
        ));
    }

    #[test]
    fn test_invalid_batch_writes_nothing() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        let mut batch = record(10, 40);
        batch.extend_from_slice(&[0u8; 24]);
        assert!(matches!(
            channel.store(&batch),
            Err(Error::InvalidEntityLength { length: 0, .. })
        ));
        assert_eq!(channel.head_file().unwrap().total_length(), 0);
    }

    #[test]
    fn test_reopen_rebuilds_index() {
        let fs = Arc::new(MemoryFileSystem::new());
        {
            let mut channel = StorageChannel::open(0, context(fs.clone())).unwrap();
            channel.store(&record(10, 40)).unwrap();
            channel.store(&record(11, 40)).unwrap();
            channel.store(&record(10, 56)).unwrap();
            channel.create_next_data_file().unwrap();
            channel.store(&record(12, 32)).unwrap();
        }
        let channel = StorageChannel::open(0, context(fs)).unwrap();
        assert_eq!(channel.head_number(), 2);
        assert_eq!(channel.entity_count(), 3);
        assert_eq!(channel.location(ObjectId::new(10)).unwrap().length, 56);
        let first = channel.file(1).unwrap();
        assert_eq!(first.total_length(), 136);
        assert_eq!(first.data_length(), 96);
        assert_eq!(first.state(), FileState::Sealed);
    }

    #[test]
    fn test_reopen_cuts_torn_tail() {
        let fs = Arc::new(MemoryFileSystem::new());
        {
            let mut channel = StorageChannel::open(0, context(fs.clone())).unwrap();
            channel.store(&record(10, 40)).unwrap();
        }
        let path = PathBuf::from("/store/channel_0/channel_0_1.dat");
        fs.append(&path, &[&record(11, 64)[..30]]).unwrap();

        let channel = StorageChannel::open(0, context(fs.clone())).unwrap();
        assert_eq!(channel.entity_count(), 1);
        assert_eq!(fs.file_size(&path).unwrap(), 40);
    }

    #[test]
    fn test_rollover_at_maximum_size() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        for id in 0..41u64 {
            channel.store(&record(100 + id, 100)).unwrap();
        }
        assert_eq!(channel.head_number(), 2);
        let sealed = channel.file(1).unwrap();
        assert_eq!(sealed.state(), FileState::Sealed);
        assert_eq!(sealed.total_length(), 4100);
        assert_eq!(sealed.data_fill_ratio(), 1.0);
        assert_eq!(channel.head_file().unwrap().total_length(), 0);
    }

    #[test]
    fn test_consolidate_low_fill_file() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs.clone())).unwrap();
        for id in 0..10u64 {
            channel.store(&record(100 + id, 200)).unwrap();
        }
        channel.create_next_data_file().unwrap();
        for id in 1..10u64 {
            channel.delete(ObjectId::new(100 + id)).unwrap();
        }
        assert!((channel.file(1).unwrap().data_fill_ratio() - 0.1).abs() < 1e-9);

        let report = channel.consolidate_file(1).unwrap();
        assert_eq!(report.entities_moved, 1);
        assert!(channel.file(1).is_none());
        assert!(!fs.exists(&PathBuf::from("/store/channel_0/channel_0_1.dat")));
        let location = channel.location(ObjectId::new(100)).unwrap();
        assert_eq!(location.file_number, 2);
        assert_eq!(
            channel.read_entity(ObjectId::new(100)).unwrap().unwrap(),
            record(100, 200)
        );
    }

    #[test]
    fn test_oversized_file_is_split() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        let batch: Vec<u8> = (0..30u64).flat_map(|id| record(100 + id, 200)).collect();
        channel.store(&batch).unwrap();
        assert_eq!(channel.file(1).unwrap().total_length(), 6000);
        assert_eq!(channel.head_number(), 2);

        let report = channel.housekeep().unwrap();
        assert_eq!(report.files_dissolved, 1);
        assert_eq!(report.entities_moved, 30);
        assert!(channel.file(1).is_none());
        assert_eq!(channel.file(2).unwrap().total_length(), 4000);
        assert_eq!(channel.file(2).unwrap().state(), FileState::Retained);
        assert_eq!(channel.head_number(), 3);
        assert_eq!(channel.head_file().unwrap().total_length(), 2000);
        for id in 0..30u64 {
            assert_eq!(
                channel.read_entity(ObjectId::new(100 + id)).unwrap().unwrap(),
                record(100 + id, 200)
            );
        }

        // a second pass finds nothing to do
        assert!(channel.housekeep().unwrap().is_empty());
    }

    #[test]
    fn test_housekeep_retains_full_files() {
        let fs = Arc::new(MemoryFileSystem::new());
        let mut channel = StorageChannel::open(0, context(fs)).unwrap();
        for id in 0..11u64 {
            channel.store(&record(100 + id, 200)).unwrap();
        }
        channel.create_next_data_file().unwrap();
        channel.store(&record(500, 200)).unwrap();

        let report = channel.housekeep().unwrap();
        assert_eq!(report.files_dissolved, 0);
        assert_eq!(channel.file(1).unwrap().state(), FileState::Retained);
        assert!(channel.file(2).unwrap().is_head());
    }

    #[test]
    fn test_failed_append_leaves_channel_usable() {
        let fs = Arc::new(FaultyFileSystem::default());
        let path = PathBuf::from("/store/channel_0/channel_0_1.dat");
        {
            let mut channel = StorageChannel::open(0, context(fs.clone())).unwrap();
            channel.store(&record(10, 64)).unwrap();

            fs.tear_next_append.store(true, Ordering::SeqCst);
            assert!(matches!(
                channel.store(&record(11, 64)),
                Err(Error::FileIo { .. })
            ));
            assert_eq!(fs.file_size(&path).unwrap(), 64);
            assert!(!channel.contains(ObjectId::new(11)));

            channel.store(&record(12, 64)).unwrap();
            assert_eq!(
                channel.read_entity(ObjectId::new(12)).unwrap().unwrap(),
                record(12, 64)
            );
            assert_eq!(channel.location(ObjectId::new(12)).unwrap().offset, 64);
        }

        let channel = StorageChannel::open(0, context(fs.clone())).unwrap();
        assert_eq!(channel.entity_count(), 2);
        assert!(!channel.contains(ObjectId::new(11)));
        assert_eq!(
            channel.read_entity(ObjectId::new(12)).unwrap().unwrap(),
            record(12, 64)
        );
        assert_eq!(fs.file_size(&path).unwrap(), 128);
    }

    #[test]
    fn test_untruncatable_append_blocks_writes_until_repaired() {
        let fs = Arc::new(FaultyFileSystem::default());
        let path = PathBuf::from("/store/channel_0/channel_0_1.dat");
        let mut channel = StorageChannel::open(0, context(fs.clone())).unwrap();
        channel.store(&record(10, 64)).unwrap();

        fs.fail_truncate.store(true, Ordering::SeqCst);
        fs.tear_next_append.store(true, Ordering::SeqCst);
        assert!(channel.store(&record(11, 64)).is_err());
        assert!(matches!(
            channel.store(&record(12, 64)),
            Err(Error::ChannelFailure { channel: 0, .. })
        ));
        assert!(channel.housekeep().is_err());
        assert_eq!(fs.file_size(&path).unwrap(), 96);

        fs.fail_truncate.store(false, Ordering::SeqCst);
        channel.store(&record(12, 64)).unwrap();
        assert_eq!(fs.file_size(&path).unwrap(), 128);
        assert_eq!(
            channel.read_entity(ObjectId::new(12)).unwrap().unwrap(),
            record(12, 64)
        );
        drop(channel);

        let channel = StorageChannel::open(0, context(fs)).unwrap();
        assert_eq!(channel.entity_count(), 2);
        assert!(channel.contains(ObjectId::new(10)));
        assert!(channel.contains(ObjectId::new(12)));
    }
}
