//! Object identity registry
//!
//! Maps live entities to their object ids and back for one open storage.
//! Entries hold weak references: the registry never keeps an entity alive,
//! and an entry whose entity was dropped is treated as absent.
//!
//! Identity is pointer identity. An address can be reused after its entity
//! is dropped, so every pointer lookup confirms the weak reference still
//! points at the same allocation.

use crate::entity::Entity;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tessera_core::ObjectId;

fn key(entity: &Arc<Entity>) -> usize {
    Arc::as_ptr(entity) as usize
}

/// Concurrent entity <-> object id map
#[derive(Debug, Default)]
pub struct ObjectRegistry {
    by_id: DashMap<ObjectId, Weak<Entity>>,
    by_entity: DashMap<usize, (ObjectId, Weak<Entity>)>,
}

impl ObjectRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Object id of `entity`, if it was stored or loaded
    pub fn lookup_object_id(&self, entity: &Arc<Entity>) -> Option<ObjectId> {
        let entry = self.by_entity.get(&key(entity))?;
        let (object_id, weak) = entry.value();
        if std::ptr::eq(weak.as_ptr(), Arc::as_ptr(entity)) && weak.strong_count() > 0 {
            Some(*object_id)
        } else {
            None
        }
    }

    /// Live entity registered under `object_id`
    pub fn lookup(&self, object_id: ObjectId) -> Option<Arc<Entity>> {
        self.by_id.get(&object_id).and_then(|weak| weak.upgrade())
    }

    /// Register `entity` as `object_id`
    pub fn register(&self, object_id: ObjectId, entity: &Arc<Entity>) {
        let weak = Arc::downgrade(entity);
        self.by_id.insert(object_id, weak.clone());
        self.by_entity.insert(key(entity), (object_id, weak));
    }

    /// Forget `object_id`
    pub fn remove(&self, object_id: ObjectId) {
        if let Some((_, weak)) = self.by_id.remove(&object_id) {
            self.by_entity.remove(&(weak.as_ptr() as usize));
        }
    }

    /// Drop entries whose entity is gone
    ///
    /// Returns how many entries were dropped.
    pub fn purge(&self) -> usize {
        let before = self.by_id.len();
        self.by_id.retain(|_, weak| weak.strong_count() > 0);
        self.by_entity.retain(|_, (_, weak)| weak.strong_count() > 0);
        before - self.by_id.len()
    }

    /// Registered entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
