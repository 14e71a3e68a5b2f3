//! Storer sessions
//!
//! A [`Storer`] walks the graph reachable from the instances passed to
//! [`Storer::store`], assigns object ids and snapshots field values. Nothing
//! touches disk until [`Storer::commit`]:
//!
//! ```text
//! store(root) ──> traverse (ids + snapshots)
//!                    │
//! commit() ────────> resolve type ids (one group)
//!                    ├─ encode records into a WriteBatch
//!                    ├─ persist the type dictionary if it grew
//!                    ├─ ChannelManager::commit (all channels, barrier)
//!                    └─ register ids, mark lazy handles stored
//! ```
//!
//! ## Modes
//!
//! | Reference to...                   | Lazy mode         | Eager mode         |
//! |-----------------------------------|-------------------|--------------------|
//! | entity without an object id       | stored            | stored             |
//! | entity with an object id          | id only           | stored again       |
//! | unloaded lazy handle              | id only           | id only            |
//! | loaded lazy subject without id    | stored            | stored             |
//! | loaded lazy subject with id       | id only           | stored again       |
//!
//! Instances passed to `store` directly are always stored.

use crate::entity::{Entity, EntityValue, Reference};
use crate::lazy::Lazy;
use crate::storage::StorageInner;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tessera_core::{Error, ObjectId, Result, TypeId, Value};
use tessera_storage::{CommitReport, WriteBatch};
use tessera_types::{PseudoField, TypeLayout};
use tracing::{debug, info};

/// Reference storing policy of a [`Storer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorerMode {
    /// Store new instances, reference already stored ones by id
    #[default]
    Lazy,
    /// Store every reachable loaded instance
    Eager,
}

struct Pending {
    object_id: ObjectId,
    entity: Arc<Entity>,
    values: Vec<Value>,
}

/// Single-use store session
pub struct Storer<'a> {
    inner: &'a StorageInner,
    mode: StorerMode,
    /// Entity address -> (assigned id, entity) for everything this session stores
    session: FxHashMap<usize, (ObjectId, Arc<Entity>)>,
    queue: VecDeque<(ObjectId, Arc<Entity>)>,
    pending: Vec<Pending>,
    lazies: Vec<(Arc<Lazy>, ObjectId)>,
}

fn address(entity: &Arc<Entity>) -> usize {
    Arc::as_ptr(entity) as usize
}

impl<'a> Storer<'a> {
    pub(crate) fn new(inner: &'a StorageInner, mode: StorerMode) -> Self {
        Self {
            inner,
            mode,
            session: FxHashMap::default(),
            queue: VecDeque::new(),
            pending: Vec::new(),
            lazies: Vec::new(),
        }
    }

    /// Policy of this session
    pub fn mode(&self) -> StorerMode {
        self.mode
    }

    /// Number of records collected so far
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Collect `root` and everything the mode requires from its graph
    ///
    /// Returns the object id of `root`, assigning one if it has none.
    pub fn store(&mut self, root: &Arc<Entity>) -> Result<ObjectId> {
        let object_id = self.enqueue(root, true)?;
        self.drain()?;
        Ok(object_id)
    }

    /// [`Storer::store`] for several instances
    pub fn store_all(&mut self, roots: &[Arc<Entity>]) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::with_capacity(roots.len());
        for root in roots {
            ids.push(self.enqueue(root, true)?);
        }
        self.drain()?;
        Ok(ids)
    }

    /// Id of `entity` within this session
    ///
    /// Entities the session has to store are queued; others are only
    /// referenced by their existing id.
    fn enqueue(&mut self, entity: &Arc<Entity>, force: bool) -> Result<ObjectId> {
        if let Some((object_id, _)) = self.session.get(&address(entity)) {
            return Ok(*object_id);
        }
        let known = self.inner.registry.lookup_object_id(entity);
        if let Some(object_id) = known {
            if !force && self.mode == StorerMode::Lazy {
                return Ok(object_id);
            }
        }
        let object_id = match known {
            Some(object_id) => object_id,
            None => ObjectId::new(self.inner.object_ids.next_id()?),
        };
        self.enqueue_as(entity, object_id);
        Ok(object_id)
    }

    fn enqueue_as(&mut self, entity: &Arc<Entity>, object_id: ObjectId) {
        self.session
            .entry(address(entity))
            .or_insert_with(|| (object_id, Arc::clone(entity)));
        self.queue.push_back((object_id, Arc::clone(entity)));
    }

    fn drain(&mut self) -> Result<()> {
        while let Some((object_id, entity)) = self.queue.pop_front() {
            let snapshot = entity.snapshot();
            let layout = Arc::clone(entity.layout());
            let mut values = Vec::with_capacity(snapshot.len());
            for (field, value) in layout.fields().iter().zip(snapshot.iter()) {
                values.push(self.convert(&layout, field, value)?);
            }
            self.pending.push(Pending {
                object_id,
                entity,
                values,
            });
        }
        Ok(())
    }

    /// Swap live references for object ids
    fn convert(
        &mut self,
        layout: &TypeLayout,
        field: &PseudoField,
        value: &EntityValue,
    ) -> Result<Value> {
        let target = field.kind().target();
        value.try_map_refs(&mut |reference: &Reference| -> Result<Option<ObjectId>> {
            match reference {
                Reference::Entity(entity) => {
                    check_target(layout, field, target, entity)?;
                    self.enqueue(entity, false).map(Some)
                }
                Reference::Lazy(lazy) => self.lazy_id(layout, field, target, lazy),
            }
        })
    }

    fn lazy_id(
        &mut self,
        layout: &TypeLayout,
        field: &PseudoField,
        target: Option<&str>,
        lazy: &Arc<Lazy>,
    ) -> Result<Option<ObjectId>> {
        let subject = lazy.peek();
        if let Some(subject) = &subject {
            check_target(layout, field, target, subject)?;
        }
        match (lazy.object_id(), subject) {
            (Some(object_id), Some(subject)) => {
                if self.mode == StorerMode::Eager
                    && !self.session.contains_key(&address(&subject))
                {
                    self.enqueue_as(&subject, object_id);
                }
                Ok(Some(object_id))
            }
            (Some(object_id), None) => Ok(Some(object_id)),
            (None, Some(subject)) => {
                let object_id = self.enqueue(&subject, false)?;
                self.lazies.push((Arc::clone(lazy), object_id));
                Ok(Some(object_id))
            }
            (None, None) => Ok(None),
        }
    }

    /// Write everything collected to the channels
    ///
    /// The type dictionary is persisted first if new types were assigned.
    /// Object ids become known to the storage only after every channel
    /// acknowledged its records.
    ///
    /// # Errors
    ///
    /// Fails on unresolvable types, values that do not fit their persisted
    /// layout, or any channel I/O failure. Channels that already wrote their
    /// records keep them.
    pub fn commit(self) -> Result<CommitReport> {
        let inner = self.inner;
        let _guard = inner.commit_lock.lock();
        if inner.manager.is_shut_down() {
            return Err(Error::invalid_operation("storage is shut down"));
        }

        let type_ids = self.resolve_types()?;
        let mut batch: WriteBatch = inner.manager.new_batch();
        for (pending, type_id) in self.pending.iter().zip(&type_ids) {
            inner.codec.encode(
                *type_id,
                pending.object_id,
                &pending.values,
                batch.buffer_for(pending.object_id),
            )?;
        }

        inner.persist_dictionary()?;
        let report = inner.manager.commit(batch)?;

        for pending in &self.pending {
            inner.registry.register(pending.object_id, &pending.entity);
        }
        for (lazy, object_id) in &self.lazies {
            lazy.mark_stored(*object_id, inner.lazy_loader());
        }
        info!(
            target: "tessera::store",
            records = report.records,
            bytes = report.bytes,
            superseded = report.superseded,
            mode = ?self.mode,
            "Committed store"
        );
        Ok(report)
    }

    /// Type id of every pending record, resolving all new layouts as one group
    fn resolve_types(&self) -> Result<Vec<TypeId>> {
        let mut index: FxHashMap<usize, usize> = FxHashMap::default();
        let mut layouts: Vec<&TypeLayout> = Vec::new();
        let mut slots = Vec::with_capacity(self.pending.len());
        for pending in &self.pending {
            let layout = pending.entity.layout();
            let key = Arc::as_ptr(layout) as usize;
            let slot = *index.entry(key).or_insert_with(|| {
                layouts.push(layout.as_ref());
                layouts.len() - 1
            });
            slots.push(slot);
        }
        let resolved = self.inner.types.resolve_type_ids(&layouts)?;
        debug!(
            target: "tessera::store",
            layouts = layouts.len(),
            records = slots.len(),
            "Resolved record types"
        );
        Ok(slots.into_iter().map(|slot| resolved[slot]).collect())
    }
}

impl std::fmt::Debug for Storer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storer")
            .field("mode", &self.mode)
            .field("pending", &self.pending.len())
            .field("lazies", &self.lazies.len())
            .finish()
    }
}

/// Typed references must point at an instance of the declared type
fn check_target(
    layout: &TypeLayout,
    field: &PseudoField,
    target: Option<&str>,
    entity: &Entity,
) -> Result<()> {
    match target {
        Some(expected) if expected != entity.type_name() => Err(Error::LayoutMismatch {
            type_id: TypeId::NULL,
            type_name: layout.type_name().to_string(),
            detail: format!(
                "field {} expects {}, got {}",
                field.name(),
                expected,
                entity.type_name()
            ),
        }),
        _ => Ok(()),
    }
}
