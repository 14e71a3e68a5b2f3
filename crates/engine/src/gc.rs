//! Garbage collection of unreachable entities
//!
//! Marking walks stored records from the roots record using the codec's
//! reference iteration, so no entity is materialized. Lazy references count
//! as reachable. Every live record that was not marked is then deleted in
//! its channel, which turns it into gap bytes for housekeeping to reclaim.

use crate::storage::StorageInner;
use rustc_hash::FxHashSet;
use tessera_core::{ObjectId, Result};
use tracing::{info, warn};

/// Outcome of one garbage collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcReport {
    /// Entities reachable from the roots record
    pub marked: u64,
    /// Entities deleted
    pub deleted: u64,
}

pub(crate) fn collect_garbage(inner: &StorageInner) -> Result<GcReport> {
    let _guard = inner.commit_lock.lock();
    if !inner.manager.contains(ObjectId::ROOTS) {
        warn!(target: "tessera::gc", "No roots record stored, skipping garbage collection");
        return Ok(GcReport::default());
    }

    let mut marked: FxHashSet<ObjectId> = FxHashSet::default();
    let mut stack = vec![ObjectId::ROOTS];
    while let Some(object_id) = stack.pop() {
        if !marked.insert(object_id) {
            continue;
        }
        match inner.manager.read_entity(object_id)? {
            Some(record) => {
                inner.codec.iterate_references(&record, true, &mut |target| {
                    if !marked.contains(&target) {
                        stack.push(target);
                    }
                })?;
            }
            None => {
                warn!(target: "tessera::gc", %object_id, "Reachable object has no record");
            }
        }
    }

    let garbage: Vec<ObjectId> = inner
        .manager
        .object_ids()
        .into_iter()
        .filter(|object_id| !marked.contains(object_id))
        .collect();
    let deleted = inner.manager.delete(&garbage)?;
    for object_id in &garbage {
        inner.registry.remove(*object_id);
    }
    inner.registry.purge();

    let report = GcReport {
        marked: marked.len() as u64,
        deleted,
    };
    info!(
        target: "tessera::gc",
        marked = report.marked,
        deleted = report.deleted,
        "Garbage collection complete"
    );
    Ok(report)
}
