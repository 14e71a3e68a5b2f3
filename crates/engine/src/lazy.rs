//! Lazy references
//!
//! A [`Lazy`] stands in for an entity that is not loaded together with the
//! graph referencing it. It holds the object id, the subject once loaded, or
//! both. The first [`Lazy::get`] loads the subject through the storage that
//! created the handle; [`Lazy::clear`] drops a stored subject again so its
//! memory can be reclaimed.

use crate::entity::Entity;
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};
use tessera_core::{Error, ObjectId, Result};

/// Source of lazily loaded subjects
pub(crate) trait LazyLoader: Send + Sync {
    fn load_lazy(&self, object_id: ObjectId) -> Result<Arc<Entity>>;
}

#[derive(Default)]
struct LazyState {
    object_id: Option<ObjectId>,
    subject: Option<Arc<Entity>>,
}

/// Handle to a possibly unloaded entity
pub struct Lazy {
    state: Mutex<LazyState>,
    loader: Mutex<Option<Weak<dyn LazyLoader>>>,
}

impl Lazy {
    /// Handle around a new, not yet stored subject
    pub fn new(subject: Arc<Entity>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LazyState {
                object_id: None,
                subject: Some(subject),
            }),
            loader: Mutex::new(None),
        })
    }

    /// Handle to a stored subject that is not loaded
    pub(crate) fn unloaded(object_id: ObjectId, loader: Weak<dyn LazyLoader>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LazyState {
                object_id: Some(object_id),
                subject: None,
            }),
            loader: Mutex::new(Some(loader)),
        })
    }

    /// Handle to a stored subject that is already in memory
    pub(crate) fn loaded(
        object_id: ObjectId,
        subject: Arc<Entity>,
        loader: Weak<dyn LazyLoader>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(LazyState {
                object_id: Some(object_id),
                subject: Some(subject),
            }),
            loader: Mutex::new(Some(loader)),
        })
    }

    /// Object id of the subject, once stored
    pub fn object_id(&self) -> Option<ObjectId> {
        self.state.lock().object_id
    }

    /// True if the subject is in memory
    pub fn is_loaded(&self) -> bool {
        self.state.lock().subject.is_some()
    }

    /// The subject if it is in memory, without loading
    pub fn peek(&self) -> Option<Arc<Entity>> {
        self.state.lock().subject.clone()
    }

    /// The subject, loading it on first access
    ///
    /// # Errors
    ///
    /// Fails if the owning storage is closed or the subject cannot be
    /// loaded. A failed load leaves the handle unloaded.
    pub fn get(&self) -> Result<Arc<Entity>> {
        let object_id = {
            let state = self.state.lock();
            if let Some(subject) = &state.subject {
                return Ok(Arc::clone(subject));
            }
            state
                .object_id
                .ok_or_else(|| Error::invalid_operation("lazy reference has neither subject nor id"))?
        };
        let loader = self
            .loader
            .lock()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::invalid_operation("storage of lazy reference is closed"))?;
        let subject = loader.load_lazy(object_id)?;

        let mut state = self.state.lock();
        Ok(Arc::clone(state.subject.get_or_insert(subject)))
    }

    /// Drop the in-memory subject if it is stored
    ///
    /// Returns true if the subject was released.
    pub fn clear(&self) -> bool {
        let mut state = self.state.lock();
        if state.object_id.is_some() && self.loader.lock().is_some() {
            state.subject.take().is_some()
        } else {
            false
        }
    }

    /// Record the id and storage after the subject was committed
    pub(crate) fn mark_stored(&self, object_id: ObjectId, loader: Weak<dyn LazyLoader>) {
        self.state.lock().object_id = Some(object_id);
        *self.loader.lock() = Some(loader);
    }
}

impl fmt::Debug for Lazy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Lazy")
            .field("object_id", &state.object_id)
            .field("loaded", &state.subject.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use tessera_types::TypeLayout;

    struct CountingLoader {
        layout: Arc<TypeLayout>,
        loads: PlMutex<u32>,
    }

    impl LazyLoader for CountingLoader {
        fn load_lazy(&self, _object_id: ObjectId) -> Result<Arc<Entity>> {
            *self.loads.lock() += 1;
            Ok(Entity::blank(self.layout.clone()))
        }
    }

    fn loader() -> Arc<CountingLoader> {
        Arc::new(CountingLoader {
            layout: Arc::new(TypeLayout::builder("test.Leaf").long("v").build().unwrap()),
            loads: PlMutex::new(0),
        })
    }

    #[test]
    fn test_get_loads_once() {
        let source = loader();
        let weak: Weak<dyn LazyLoader> = Arc::downgrade(&source) as Weak<dyn LazyLoader>;
        let lazy = Lazy::unloaded(ObjectId::new(42), weak);
        assert!(!lazy.is_loaded());
        let first = lazy.get().unwrap();
        let second = lazy.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*source.loads.lock(), 1);
    }

    #[test]
    fn test_clear_and_reload() {
        let source = loader();
        let weak: Weak<dyn LazyLoader> = Arc::downgrade(&source) as Weak<dyn LazyLoader>;
        let lazy = Lazy::unloaded(ObjectId::new(42), weak);
        lazy.get().unwrap();
        assert!(lazy.clear());
        assert!(!lazy.is_loaded());
        lazy.get().unwrap();
        assert_eq!(*source.loads.lock(), 2);
    }

    #[test]
    fn test_new_subject_cannot_be_cleared() {
        let subject = Entity::blank(Arc::new(
            TypeLayout::builder("test.Leaf").long("v").build().unwrap(),
        ));
        let lazy = Lazy::new(subject.clone());
        assert!(!lazy.clear());
        assert!(Arc::ptr_eq(&lazy.get().unwrap(), &subject));
        assert!(lazy.object_id().is_none());
    }

    #[test]
    fn test_closed_storage() {
        let source = loader();
        let weak: Weak<dyn LazyLoader> = Arc::downgrade(&source) as Weak<dyn LazyLoader>;
        let lazy = Lazy::unloaded(ObjectId::new(42), weak);
        drop(source);
        assert!(lazy.get().is_err());
    }
}
