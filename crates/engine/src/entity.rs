//! Entity envelope
//!
//! Every persistable instance is an [`Entity`]: a declared [`TypeLayout`]
//! plus the current state as an immutable snapshot of field values. Updates
//! build a new snapshot and swap it in atomically, so readers never see a
//! half-applied update.
//!
//! ```text
//! Entity
//! ├── layout     Arc<TypeLayout>            (fields, kinds)
//! ├── state      RwLock<Arc<[EntityValue]>> (swapped on update)
//! ├── version    AtomicU64                  (+1 per update)
//! └── hooks      [UpdateHook]               (run after each swap, in order)
//! ```
//!
//! References between entities are plain `Arc`s. Identity is pointer
//! identity: two entities with equal values are still two objects.

use crate::lazy::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tessera_core::{Error, Result, TypeId, Value};
use tessera_types::{ElementKind, FieldKind, TypeLayout};

/// Target of a reference field
#[derive(Clone)]
pub enum Reference {
    /// Eager reference to a live entity
    Entity(Arc<Entity>),
    /// Lazy reference, loaded on first access
    Lazy(Arc<Lazy>),
}

impl Reference {
    /// The entity if this is an eager reference
    pub fn as_entity(&self) -> Option<&Arc<Entity>> {
        match self {
            Reference::Entity(entity) => Some(entity),
            Reference::Lazy(_) => None,
        }
    }

    /// The lazy handle if this is a lazy reference
    pub fn as_lazy(&self) -> Option<&Arc<Lazy>> {
        match self {
            Reference::Lazy(lazy) => Some(lazy),
            Reference::Entity(_) => None,
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Reference::Entity(a), Reference::Entity(b)) => Arc::ptr_eq(a, b),
            (Reference::Lazy(a), Reference::Lazy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// Shallow: graphs may be cyclic
impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Entity(entity) => {
                write!(f, "Entity({}@{:p})", entity.type_name(), Arc::as_ptr(entity))
            }
            Reference::Lazy(lazy) => match lazy.object_id() {
                Some(id) => write!(f, "Lazy({})", id),
                None => f.write_str("Lazy(new)"),
            },
        }
    }
}

/// Field value of a live entity
pub type EntityValue = Value<Reference>;

/// Eager reference value
pub fn entity_ref(entity: &Arc<Entity>) -> EntityValue {
    Value::Ref(Some(Reference::Entity(Arc::clone(entity))))
}

/// Lazy reference value
pub fn lazy_ref(lazy: &Arc<Lazy>) -> EntityValue {
    Value::Ref(Some(Reference::Lazy(Arc::clone(lazy))))
}

/// Behavior run after every successful update
///
/// Hooks run in registration order, outside the state lock, with the
/// snapshot that was replaced.
pub trait UpdateHook: Send + Sync {
    /// Called after `entity` moved to `version`
    fn on_update(&self, entity: &Entity, previous: &Arc<[EntityValue]>, version: u64);
}

impl<F> UpdateHook for F
where
    F: Fn(&Entity, &Arc<[EntityValue]>, u64) + Send + Sync,
{
    fn on_update(&self, entity: &Entity, previous: &Arc<[EntityValue]>, version: u64) {
        self(entity, previous, version)
    }
}

/// Hook keeping the most recent replaced snapshots
#[derive(Debug)]
pub struct VersionHistory {
    capacity: usize,
    entries: parking_lot::Mutex<std::collections::VecDeque<(u64, Arc<[EntityValue]>)>>,
}

impl VersionHistory {
    /// Keep at most `capacity` old snapshots
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            entries: parking_lot::Mutex::new(std::collections::VecDeque::with_capacity(capacity)),
        })
    }

    /// `(version, snapshot)` pairs, oldest first
    ///
    /// The version is the one the snapshot had before it was replaced.
    pub fn entries(&self) -> Vec<(u64, Arc<[EntityValue]>)> {
        self.entries.lock().iter().cloned().collect()
    }
}

impl UpdateHook for VersionHistory {
    fn on_update(&self, _entity: &Entity, previous: &Arc<[EntityValue]>, version: u64) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back((version - 1, Arc::clone(previous)));
    }
}

/// Persistable instance: layout plus swappable state
pub struct Entity {
    layout: Arc<TypeLayout>,
    state: RwLock<Arc<[EntityValue]>>,
    version: AtomicU64,
    hooks: RwLock<Vec<Arc<dyn UpdateHook>>>,
}

impl Entity {
    /// Entity with the given field values
    ///
    /// # Errors
    ///
    /// Returns a layout mismatch if the values do not fit the layout.
    pub fn new(layout: Arc<TypeLayout>, values: Vec<EntityValue>) -> Result<Arc<Self>> {
        check_values(&layout, &values)?;
        Ok(Arc::new(Self::with_state(layout, values.into())))
    }

    /// Entity with every field at its zero value
    pub fn blank(layout: Arc<TypeLayout>) -> Arc<Self> {
        let values: Vec<EntityValue> = layout.default_values();
        Arc::new(Self::with_state(layout, values.into()))
    }

    fn with_state(layout: Arc<TypeLayout>, state: Arc<[EntityValue]>) -> Self {
        Self {
            layout,
            state: RwLock::new(state),
            version: AtomicU64::new(0),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Declared layout
    pub fn layout(&self) -> &Arc<TypeLayout> {
        &self.layout
    }

    /// Qualified type name
    pub fn type_name(&self) -> &str {
        self.layout.type_name()
    }

    /// Current state
    pub fn snapshot(&self) -> Arc<[EntityValue]> {
        Arc::clone(&self.state.read())
    }

    /// Number of updates applied so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current value of field `name`
    pub fn get(&self, name: &str) -> Option<EntityValue> {
        let index = self.layout.field_index(name)?;
        Some(self.state.read()[index].clone())
    }

    /// Target of the eager reference field `name`
    pub fn reference(&self, name: &str) -> Option<Arc<Entity>> {
        match self.get(name)? {
            Value::Ref(Some(Reference::Entity(entity))) => Some(entity),
            _ => None,
        }
    }

    /// Handle of the lazy reference field `name`
    pub fn lazy(&self, name: &str) -> Option<Arc<Lazy>> {
        match self.get(name)? {
            Value::Ref(Some(Reference::Lazy(lazy))) => Some(lazy),
            _ => None,
        }
    }

    /// Append a hook run after every update
    pub fn add_hook(&self, hook: Arc<dyn UpdateHook>) {
        self.hooks.write().push(hook);
    }

    /// Apply `change` to a copy of the state and swap it in
    ///
    /// Returns the new version. Nothing changes if `change` fails or leaves
    /// values that do not fit the layout.
    pub fn update<F>(&self, change: F) -> Result<u64>
    where
        F: FnOnce(&mut Vec<EntityValue>) -> Result<()>,
    {
        let (previous, version) = {
            let mut state = self.state.write();
            let mut values = state.to_vec();
            change(&mut values)?;
            check_values(&self.layout, &values)?;
            let previous = std::mem::replace(&mut *state, values.into());
            (previous, self.version.fetch_add(1, Ordering::AcqRel) + 1)
        };
        let hooks = self.hooks.read().clone();
        for hook in &hooks {
            hook.on_update(self, &previous, version);
        }
        Ok(version)
    }

    /// Set field `name`
    pub fn set(&self, name: &str, value: EntityValue) -> Result<u64> {
        let index = self.layout.field_index(name).ok_or_else(|| {
            Error::invalid_operation(format!("{} has no field '{}'", self.type_name(), name))
        })?;
        self.update(|values| {
            values[index] = value;
            Ok(())
        })
    }

    /// Install loaded state without running hooks
    pub(crate) fn install(&self, values: Vec<EntityValue>) -> Result<()> {
        check_values(&self.layout, &values)?;
        *self.state.write() = values.into();
        Ok(())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity")
            .field("type_name", &self.type_name())
            .field("version", &self.version())
            .field("values", &self.snapshot())
            .finish()
    }
}

fn mismatch(layout: &TypeLayout, detail: String) -> Error {
    Error::LayoutMismatch {
        type_id: TypeId::NULL,
        type_name: layout.type_name().to_string(),
        detail,
    }
}

/// Check kinds, and that eager fields hold entities and lazy fields handles
fn check_values(layout: &TypeLayout, values: &[EntityValue]) -> Result<()> {
    if values.len() != layout.fields().len() {
        return Err(mismatch(
            layout,
            format!("expected {} values, got {}", layout.fields().len(), values.len()),
        ));
    }
    for (field, value) in layout.fields().iter().zip(values) {
        if !field.kind().accepts(value) {
            return Err(mismatch(
                layout,
                format!(
                    "field {} of kind {} cannot hold a {} value",
                    field.name(),
                    field.kind(),
                    value.kind_name()
                ),
            ));
        }
        let reference_ok = match (field.kind(), value) {
            (FieldKind::Reference { lazy, .. }, Value::Ref(Some(target))) => {
                matches!(target, Reference::Lazy(_)) == *lazy
            }
            (FieldKind::Array(ElementKind::Reference { .. }), Value::Array(items)) => items
                .iter()
                .all(|item| !matches!(item, Value::Ref(Some(Reference::Lazy(_))))),
            _ => true,
        };
        if !reference_ok {
            return Err(mismatch(
                layout,
                format!(
                    "field {} of kind {} holds the wrong reference flavor",
                    field.name(),
                    field.kind()
                ),
            ));
        }
    }
    Ok(())
}
