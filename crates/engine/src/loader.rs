//! Loader sessions
//!
//! Loading runs in two phases so that cycles never recurse:
//!
//! 1. **Create**: pop an object id from the queue, read and decode its
//!    record, map legacy layouts, create a blank entity for it and queue the
//!    ids of its eager references. Ids with a live entity in the object
//!    registry are reused as they are.
//! 2. **Update**: once the queue is empty every eagerly referenced entity
//!    exists, so each record's references are swapped for those entities (or
//!    lazy handles) and the state is installed.
//!
//! Only after both phases succeed are the new entities registered, so a
//! failed load leaves no half-filled entity reachable through the registry.

use crate::entity::{Entity, EntityValue, Reference};
use crate::lazy::Lazy;
use crate::storage::StorageInner;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tessera_core::{Error, ObjectId, Result, TypeId, Value};
use tessera_types::TypeLayout;
use tracing::debug;

struct Created {
    object_id: ObjectId,
    entity: Arc<Entity>,
    values: Vec<Value>,
}

pub(crate) struct Loader<'a> {
    inner: &'a StorageInner,
    created: FxHashMap<ObjectId, Arc<Entity>>,
    order: Vec<Created>,
    /// (object id, id of the record referencing it)
    queue: VecDeque<(ObjectId, ObjectId)>,
}

impl<'a> Loader<'a> {
    pub(crate) fn new(inner: &'a StorageInner) -> Self {
        Self {
            inner,
            created: FxHashMap::default(),
            order: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    /// Load `object_id` and everything it references eagerly
    pub(crate) fn load(mut self, object_id: ObjectId) -> Result<Arc<Entity>> {
        if let Some(entity) = self.inner.registry.lookup(object_id) {
            return Ok(entity);
        }
        self.queue.push_back((object_id, ObjectId::NULL));
        self.run()?;
        self.created
            .get(&object_id)
            .cloned()
            .ok_or(Error::ObjectNotFound(object_id))
    }

    /// Load the record of `object_id` into the existing blank `shell`
    pub(crate) fn load_into(mut self, object_id: ObjectId, shell: Arc<Entity>) -> Result<()> {
        let bytes = self
            .inner
            .manager
            .read_entity(object_id)?
            .ok_or(Error::ObjectNotFound(object_id))?;
        self.create(object_id, &bytes, Some(shell))?;
        self.run()
    }

    fn run(&mut self) -> Result<()> {
        while let Some((object_id, referenced_by)) = self.queue.pop_front() {
            if self.created.contains_key(&object_id) {
                continue;
            }
            if let Some(live) = self.inner.registry.lookup(object_id) {
                self.created.insert(object_id, live);
                continue;
            }
            let bytes = self.inner.manager.read_entity(object_id)?.ok_or({
                if referenced_by.is_null() {
                    Error::ObjectNotFound(object_id)
                } else {
                    Error::DanglingReference {
                        object_id,
                        referenced_by,
                    }
                }
            })?;
            self.create(object_id, &bytes, None)?;
        }

        let order = std::mem::take(&mut self.order);
        for created in &order {
            let values = self.resolve(created)?;
            created.entity.install(values)?;
        }
        for created in &order {
            self.inner
                .registry
                .register(created.object_id, &created.entity);
        }
        debug!(target: "tessera::load", entities = order.len(), "Loaded entities");
        Ok(())
    }

    /// Phase one for a single record
    fn create(
        &mut self,
        object_id: ObjectId,
        bytes: &[u8],
        shell: Option<Arc<Entity>>,
    ) -> Result<()> {
        let decoded = self.inner.codec.decode(bytes)?;
        if decoded.header.object_id != object_id {
            return Err(Error::invalid_operation(format!(
                "record read for object {} belongs to object {}",
                object_id, decoded.header.object_id
            )));
        }
        let (type_id, values) =
            self.map_legacy(object_id, decoded.header.type_id, decoded.values)?;
        let layout = self.inner.layout_for(type_id)?;

        for (field, value) in layout.fields().iter().zip(&values) {
            if field.kind().is_reference() && !field.kind().is_lazy() {
                value.for_each_ref(&mut |target: &ObjectId| {
                    self.queue.push_back((*target, object_id));
                });
            }
        }

        let entity = match shell {
            Some(shell) => shell,
            None => Entity::blank(layout),
        };
        self.created.insert(object_id, Arc::clone(&entity));
        self.order.push(Created {
            object_id,
            entity,
            values,
        });
        Ok(())
    }

    /// Values of a legacy record rebuilt in its current layout
    fn map_legacy(
        &self,
        object_id: ObjectId,
        type_id: TypeId,
        values: Vec<Value>,
    ) -> Result<(TypeId, Vec<Value>)> {
        let types = &self.inner.types;
        if types.is_current(type_id) {
            return Ok((type_id, values));
        }
        let legacy = types.describe(type_id)?;
        let failed = |reason: String| Error::LegacyMapping {
            type_id,
            object_id,
            reason,
        };
        let current = types
            .current(legacy.type_name())
            .ok_or_else(|| failed(format!("no current type named {}", legacy.type_name())))?;
        let handler = self
            .inner
            .legacy
            .get(legacy.type_name())
            .ok_or_else(|| failed(format!("no legacy handler for {}", legacy.type_name())))?;
        let mapped = handler
            .map(&legacy, &current, values)
            .map_err(|e| failed(e.to_string()))?;
        debug!(
            target: "tessera::load",
            %object_id,
            legacy_type_id = %type_id,
            type_id = %current.type_id(),
            "Mapped legacy record"
        );
        Ok((current.type_id(), mapped))
    }

    /// Phase two: object ids to live references
    fn resolve(&self, created: &Created) -> Result<Vec<EntityValue>> {
        let layout: &TypeLayout = created.entity.layout();
        let mut values = Vec::with_capacity(created.values.len());
        for (field, value) in layout.fields().iter().zip(&created.values) {
            let lazy = field.kind().is_lazy();
            let resolved = value.try_map_refs(&mut |target: &ObjectId| -> Result<Option<Reference>> {
                let live = self
                    .created
                    .get(target)
                    .cloned()
                    .or_else(|| self.inner.registry.lookup(*target));
                if lazy {
                    let loader = self.inner.lazy_loader();
                    return Ok(Some(Reference::Lazy(match live {
                        Some(subject) => Lazy::loaded(*target, subject, loader),
                        None => Lazy::unloaded(*target, loader),
                    })));
                }
                live.map(|entity| Some(Reference::Entity(entity)))
                    .ok_or(Error::DanglingReference {
                        object_id: *target,
                        referenced_by: created.object_id,
                    })
            })?;
            values.push(resolved);
        }
        Ok(values)
    }
}
