//! Type registry
//!
//! Maps declared layouts to stable [`TypeId`]s and type ids back to their
//! [`TypeDescription`]s.
//!
//! ## Identity rules
//!
//! - Same name, same pseudo-fields: same type id, forever
//! - Same name, changed pseudo-fields: a NEW type id, which becomes the
//!   name's current type. The old description stays registered as a legacy
//!   type so that old records can still be read (through a legacy handler).
//! - Descriptions are never removed.
//!
//! ## Dirty tracking
//!
//! Every newly assigned type id marks the registry dirty. The storer persists
//! the whole dictionary before committing records that use new types and
//! clears the flag afterwards.

use crate::description::TypeDescription;
use crate::dictionary;
use crate::layout::TypeLayout;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::{Error, IdProvider, Result, TypeId};
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    by_id: FxHashMap<TypeId, Arc<TypeDescription>>,
    /// Current (newest) type id per type name
    current: FxHashMap<String, TypeId>,
    dirty: bool,
}

impl RegistryInner {
    fn insert(&mut self, desc: Arc<TypeDescription>) {
        let name = desc.type_name().to_string();
        let id = desc.type_id();
        match self.current.get(&name) {
            Some(existing) if *existing > id => {}
            _ => {
                self.current.insert(name, id);
            }
        }
        self.by_id.insert(id, desc);
    }

    fn current_matching(&self, layout: &TypeLayout) -> Option<TypeId> {
        let id = self.current.get(layout.type_name())?;
        let desc = self.by_id.get(id)?;
        if desc.matches(layout) {
            Some(*id)
        } else {
            None
        }
    }

    /// Typed references must point at a registered type or one in `pending`
    fn check_targets(&self, layout: &TypeLayout, pending: &[&TypeLayout]) -> Result<()> {
        for field in layout.fields() {
            if let Some(target) = field.kind().target() {
                let known = self.current.contains_key(target)
                    || pending.iter().any(|l| l.type_name() == target);
                if !known {
                    return Err(Error::UnresolvableType {
                        type_name: target.to_string(),
                        referenced_by: format!("{}.{}", layout.type_name(), field.name()),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Registry of all type descriptions of one storage
pub struct TypeRegistry {
    inner: RwLock<RegistryInner>,
    ids: Arc<dyn IdProvider>,
}

impl TypeRegistry {
    /// Create an empty registry allocating ids from `ids`
    pub fn new(ids: Arc<dyn IdProvider>) -> Self {
        Self {
            inner: RwLock::new(RegistryInner::default()),
            ids,
        }
    }

    /// Return the type id for `layout`, assigning one on first call
    pub fn resolve_type_id(&self, layout: &TypeLayout) -> Result<TypeId> {
        let ids = self.resolve_type_ids(&[layout])?;
        Ok(ids[0])
    }

    /// Resolve a group of layouts at once
    ///
    /// Typed references may point at any layout of the group, which is how
    /// mutually referencing types get registered together.
    pub fn resolve_type_ids(&self, layouts: &[&TypeLayout]) -> Result<Vec<TypeId>> {
        {
            let inner = self.inner.read();
            let known: Option<Vec<TypeId>> =
                layouts.iter().map(|l| inner.current_matching(l)).collect();
            if let Some(known) = known {
                return Ok(known);
            }
        }

        let mut inner = self.inner.write();
        for layout in layouts {
            if inner.current_matching(layout).is_none() {
                inner.check_targets(layout, layouts)?;
            }
        }

        let mut resolved = Vec::with_capacity(layouts.len());
        for layout in layouts {
            if let Some(id) = inner.current_matching(layout) {
                resolved.push(id);
                continue;
            }
            let type_id = TypeId::new(self.ids.next_id()?);
            let desc = Arc::new(TypeDescription::new(type_id, (*layout).clone())?);
            let superseded = inner.current.get(layout.type_name()).copied();
            debug!(
                target: "tessera::types",
                %type_id,
                type_name = layout.type_name(),
                superseded = ?superseded,
                "Registered type"
            );
            inner.insert(desc);
            inner.dirty = true;
            resolved.push(type_id);
        }
        Ok(resolved)
    }

    /// Description of a registered type id
    pub fn describe(&self, type_id: TypeId) -> Result<Arc<TypeDescription>> {
        self.inner
            .read()
            .by_id
            .get(&type_id)
            .cloned()
            .ok_or(Error::UnknownTypeId(type_id))
    }

    /// Current description for a type name
    pub fn current(&self, type_name: &str) -> Option<Arc<TypeDescription>> {
        let inner = self.inner.read();
        let id = inner.current.get(type_name)?;
        inner.by_id.get(id).cloned()
    }

    /// True if `type_id` is the current type of its name
    pub fn is_current(&self, type_id: TypeId) -> bool {
        let inner = self.inner.read();
        inner
            .by_id
            .get(&type_id)
            .and_then(|d| inner.current.get(d.type_name()))
            .is_some_and(|current| *current == type_id)
    }

    /// Register descriptions read from a persisted dictionary
    ///
    /// Re-registering an identical description is a no-op; a different
    /// description under an existing id is a consistency error.
    pub fn register_descriptions<I>(&self, descriptions: I) -> Result<()>
    where
        I: IntoIterator<Item = TypeDescription>,
    {
        let mut inner = self.inner.write();
        let mut max_id = 0u64;
        for desc in descriptions {
            if let Some(existing) = inner.by_id.get(&desc.type_id()) {
                if **existing != desc {
                    return Err(Error::LayoutMismatch {
                        type_id: desc.type_id(),
                        type_name: desc.type_name().to_string(),
                        detail: format!("type id already registered as {}", existing.type_name()),
                    });
                }
                continue;
            }
            max_id = max_id.max(desc.type_id().as_u64());
            inner.insert(Arc::new(desc));
        }
        if max_id > 0 {
            self.ids.ensure_above(max_id)?;
        }
        Ok(())
    }

    /// Parse dictionary text and register every description in it
    pub fn load_dictionary(&self, text: &str) -> Result<usize> {
        let descriptions = dictionary::parse(text)?;
        let count = descriptions.len();
        self.register_descriptions(descriptions)?;
        debug!(target: "tessera::types", count, "Loaded type dictionary");
        Ok(count)
    }

    /// Dictionary text of every registered description
    pub fn dictionary_text(&self) -> String {
        dictionary::assemble_shared(&self.descriptions())
    }

    /// All descriptions ordered by type id
    pub fn descriptions(&self) -> Vec<Arc<TypeDescription>> {
        let inner = self.inner.read();
        let mut all: Vec<_> = inner.by_id.values().cloned().collect();
        all.sort_by_key(|d| d.type_id());
        all
    }

    /// Number of registered descriptions
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if types were assigned since the last [`TypeRegistry::mark_clean`]
    pub fn is_dirty(&self) -> bool {
        self.inner.read().dirty
    }

    /// Clear the dirty flag after the dictionary was persisted
    pub fn mark_clean(&self) {
        self.inner.write().dirty = false;
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("TypeRegistry")
            .field("type_count", &inner.by_id.len())
            .field("name_count", &inner.current.len())
            .field("dirty", &inner.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{MemoryIdProvider, TYPE_ID_BASE};

    fn registry() -> TypeRegistry {
        TypeRegistry::new(Arc::new(MemoryIdProvider::for_types()))
    }

    fn node() -> TypeLayout {
        TypeLayout::builder("app.Node")
            .long("value")
            .reference_to("next", "app.Node")
            .build()
            .unwrap()
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let registry = registry();
        let first = registry.resolve_type_id(&node()).unwrap();
        let second = registry.resolve_type_id(&node()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.as_u64(), TYPE_ID_BASE);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_dirty());
    }

    #[test]
    fn test_changed_shape_gets_new_id() {
        let registry = registry();
        let old = registry.resolve_type_id(&node()).unwrap();
        let evolved = TypeLayout::builder("app.Node")
            .long("value")
            .text("label")
            .build()
            .unwrap();
        let new = registry.resolve_type_id(&evolved).unwrap();
        assert_ne!(old, new);
        assert!(!registry.is_current(old));
        assert!(registry.is_current(new));
        assert_eq!(registry.current("app.Node").unwrap().type_id(), new);
        // The legacy description stays available
        assert_eq!(registry.describe(old).unwrap().fields().len(), 2);
    }

    #[test]
    fn test_unknown_type_id() {
        let registry = registry();
        assert!(matches!(
            registry.describe(TypeId::new(42)),
            Err(Error::UnknownTypeId(_))
        ));
    }

    #[test]
    fn test_unregistered_target_is_fatal() {
        let registry = registry();
        let holder = TypeLayout::builder("app.Holder")
            .reference_to("item", "app.Missing")
            .build()
            .unwrap();
        let err = registry.resolve_type_id(&holder).unwrap_err();
        assert!(matches!(err, Error::UnresolvableType { ref type_name, .. } if type_name == "app.Missing"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_mutual_references_resolve_as_group() {
        let registry = registry();
        let a = TypeLayout::builder("app.A")
            .reference_to("b", "app.B")
            .build()
            .unwrap();
        let b = TypeLayout::builder("app.B")
            .reference_to("a", "app.A")
            .build()
            .unwrap();
        assert!(registry.resolve_type_id(&a).is_err());
        let ids = registry.resolve_type_ids(&[&a, &b]).unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn test_register_descriptions_advances_provider() {
        let registry = registry();
        let desc = TypeDescription::new(TypeId::new(TYPE_ID_BASE + 10), node()).unwrap();
        registry.register_descriptions(vec![desc.clone()]).unwrap();
        registry.register_descriptions(vec![desc]).unwrap();
        assert!(!registry.is_dirty());

        let other = TypeLayout::builder("app.Other").int("x").build().unwrap();
        let id = registry.resolve_type_id(&other).unwrap();
        assert!(id.as_u64() > TYPE_ID_BASE + 10);
    }

    #[test]
    fn test_conflicting_description_rejected() {
        let registry = registry();
        let id = TypeId::new(TYPE_ID_BASE);
        registry
            .register_descriptions(vec![TypeDescription::new(id, node()).unwrap()])
            .unwrap();
        let other = TypeLayout::builder("app.Other").int("x").build().unwrap();
        let result = registry.register_descriptions(vec![TypeDescription::new(id, other).unwrap()]);
        assert!(matches!(result, Err(Error::LayoutMismatch { .. })));
    }

    #[test]
    fn test_dictionary_text_reloads() {
        let registry = registry();
        registry.resolve_type_id(&node()).unwrap();
        let text = registry.dictionary_text();

        let reopened = TypeRegistry::new(Arc::new(MemoryIdProvider::for_types()));
        assert_eq!(reopened.load_dictionary(&text).unwrap(), 1);
        assert_eq!(
            reopened.current("app.Node").unwrap().type_id(),
            registry.current("app.Node").unwrap().type_id()
        );
        assert!(!reopened.is_dirty());
    }

    #[test]
    fn test_mark_clean() {
        let registry = registry();
        registry.resolve_type_id(&node()).unwrap();
        registry.mark_clean();
        assert!(!registry.is_dirty());
        registry.resolve_type_id(&node()).unwrap();
        assert!(!registry.is_dirty());
    }
}
