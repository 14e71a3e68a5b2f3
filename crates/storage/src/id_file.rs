//! Persistent id high-water marks
//!
//! `ObjectId.id` and `TypeId.id` each hold one decimal number: every id below
//! it may have been handed out. Ids are reserved in batches, and the mark is
//! rewritten (atomically) only when a batch is exhausted. After a restart
//! allocation resumes at the mark, so the unused rest of the last batch is
//! skipped and never reused.

use crate::fs::FileSystem;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tessera_core::{Error, IdProvider, Result};
use tracing::debug;

/// Default number of ids reserved per file write
pub const DEFAULT_ID_BATCH_SIZE: u64 = 1000;

#[derive(Debug)]
struct IdState {
    next: u64,
    reserved_until: u64,
}

/// File-backed id provider
#[derive(Debug)]
pub struct FileIdProvider {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    batch_size: u64,
    state: Mutex<IdState>,
}

impl FileIdProvider {
    /// Open the mark file at `path`, starting at `first` if it does not exist
    pub fn open(
        fs: Arc<dyn FileSystem>,
        path: PathBuf,
        first: u64,
        batch_size: u64,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::configuration("id_batch_size must be positive"));
        }
        let next = if fs.exists(&path) {
            let bytes = fs.read_all(&path)?;
            let text = String::from_utf8_lossy(&bytes);
            let mark: u64 = text.trim().parse().map_err(|_| {
                Error::configuration(format!(
                    "id file '{}' does not hold a number: {:?}",
                    path.display(),
                    text.trim()
                ))
            })?;
            mark.max(first)
        } else {
            first
        };
        debug!(target: "tessera::storage", path = %path.display(), next, "Opened id file");
        Ok(Self {
            fs,
            path,
            batch_size,
            state: Mutex::new(IdState {
                next,
                reserved_until: next,
            }),
        })
    }

    /// The persisted high-water mark
    pub fn reserved_until(&self) -> u64 {
        self.state.lock().reserved_until
    }

    fn persist(&self, mark: u64) -> Result<()> {
        self.fs.replace(&self.path, format!("{}\n", mark).as_bytes())
    }
}

impl IdProvider for FileIdProvider {
    fn next_id(&self) -> Result<u64> {
        let mut state = self.state.lock();
        if state.next >= state.reserved_until {
            let mark = state.next + self.batch_size;
            self.persist(mark)?;
            state.reserved_until = mark;
        }
        let id = state.next;
        state.next += 1;
        Ok(id)
    }

    fn peek(&self) -> u64 {
        self.state.lock().next
    }

    fn ensure_above(&self, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        let floor = id.saturating_add(1);
        if floor > state.next {
            state.next = floor;
        }
        if state.next > state.reserved_until {
            self.persist(state.next)?;
            state.reserved_until = state.next;
        }
        Ok(())
    }
}
