//! Embedded storage
//!
//! [`EmbeddedStorage`] is the entry point: it opens (or creates) a storage
//! directory and wires every component together once, at startup.
//!
//! ```text
//! EmbeddedStorage
//! └── StorageInner
//!     ├── types     TypeRegistry      (TypeDictionary.ptd, TypeId.id)
//!     ├── codec     RecordCodec
//!     ├── registry  ObjectRegistry    (entity <-> ObjectId, weak)
//!     ├── legacy    LegacyHandlerRegistry
//!     ├── manager   ChannelManager    (channel_<n>/, one worker each)
//!     ├── roots     tessera.Roots entity at ObjectId::ROOTS
//!     └── lock      .lock             (exclusive while open)
//! ```
//!
//! Stores and garbage collection are serialized by one commit lock; loads
//! only take channel read locks.

use crate::config::StorageConfig;
use crate::entity::{entity_ref, Entity};
use crate::gc::{self, GcReport};
use crate::lazy::LazyLoader;
use crate::loader::Loader;
use crate::registry::ObjectRegistry;
use crate::storer::{Storer, StorerMode};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tessera_codec::RecordCodec;
use tessera_core::{
    Error, IdProvider, ObjectId, Result, TypeId, Value, OBJECT_ID_BASE, TYPE_ID_BASE,
};
use tessera_storage::{
    ChannelManager, CommitReport, DirectoryLock, FileIdProvider, FileSystem, HousekeepingReport,
    LocalFileSystem, MemoryFileSystem, StorageContext, StorageLayout, StorageMeta,
    StorageStatistics,
};
use tessera_types::{LegacyHandlerRegistry, LegacyTypeHandler, TypeLayout, TypeRegistry};
use tracing::{debug, info};

/// Type name of the built-in roots record
pub const ROOTS_TYPE_NAME: &str = "tessera.Roots";

/// Layout of the built-in roots record: one untyped eager reference
pub fn roots_layout() -> Result<TypeLayout> {
    TypeLayout::builder(ROOTS_TYPE_NAME).reference("root").build()
}

pub(crate) struct StorageInner {
    pub(crate) config: StorageConfig,
    pub(crate) manager: ChannelManager,
    pub(crate) types: Arc<TypeRegistry>,
    pub(crate) codec: RecordCodec,
    pub(crate) object_ids: Arc<dyn IdProvider>,
    pub(crate) registry: ObjectRegistry,
    pub(crate) legacy: LegacyHandlerRegistry,
    pub(crate) commit_lock: Mutex<()>,
    pub(crate) roots: Arc<Entity>,
    layouts: RwLock<FxHashMap<TypeId, Arc<TypeLayout>>>,
    self_ref: Weak<StorageInner>,
    // Released last, after the channel workers stopped
    _lock: Option<DirectoryLock>,
}

impl StorageInner {
    /// Shared layout of the current description of `type_id`
    pub(crate) fn layout_for(&self, type_id: TypeId) -> Result<Arc<TypeLayout>> {
        if let Some(layout) = self.layouts.read().get(&type_id) {
            return Ok(Arc::clone(layout));
        }
        let layout = Arc::new(self.types.describe(type_id)?.layout().clone());
        Ok(Arc::clone(
            self.layouts.write().entry(type_id).or_insert(layout),
        ))
    }

    /// Write the dictionary if types were assigned since it was last written
    ///
    /// Callers hold the commit lock.
    pub(crate) fn persist_dictionary(&self) -> Result<()> {
        if !self.types.is_dirty() {
            return Ok(());
        }
        let path = self.manager.context().layout().dictionary_file();
        let text = self.types.dictionary_text();
        self.manager.context().fs().replace(&path, text.as_bytes())?;
        self.types.mark_clean();
        debug!(
            target: "tessera::types",
            path = %path.display(),
            types = self.types.len(),
            "Persisted type dictionary"
        );
        Ok(())
    }

    /// Loader handed to lazy references created by this storage
    pub(crate) fn lazy_loader(&self) -> Weak<dyn LazyLoader> {
        self.self_ref.clone() as Weak<dyn LazyLoader>
    }

    fn ensure_running(&self) -> Result<()> {
        if self.manager.is_shut_down() {
            Err(Error::invalid_operation("storage is shut down"))
        } else {
            Ok(())
        }
    }

    fn load(&self, object_id: ObjectId) -> Result<Arc<Entity>> {
        self.ensure_running()?;
        Loader::new(self).load(object_id)
    }
}

impl LazyLoader for StorageInner {
    fn load_lazy(&self, object_id: ObjectId) -> Result<Arc<Entity>> {
        self.load(object_id)
    }
}

/// An open storage directory
///
/// Cloning shares the same storage. The storage closes when the last clone
/// is dropped or [`EmbeddedStorage::shutdown`] is called.
#[derive(Clone)]
pub struct EmbeddedStorage {
    inner: Arc<StorageInner>,
}

impl EmbeddedStorage {
    // ========================================================================
    // Opening
    // ========================================================================

    /// Open `dir` with the settings of its `tessera.toml`
    ///
    /// A missing directory is created, and a missing config file is written
    /// with default settings first.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| Error::file_io(dir, e))?;
        let config_path = StorageLayout::new(dir).config_file();
        StorageConfig::write_default_if_missing(&config_path)?;
        let config = StorageConfig::from_file(&config_path)?;
        Self::open_with_config(dir, config)
    }

    /// Open `dir` with explicit settings, ignoring any `tessera.toml`
    ///
    /// # Errors
    ///
    /// Fails if the directory is locked by another open storage, if the
    /// byte order or channel count differ from the ones the storage was
    /// created with, or if any persisted file is inconsistent.
    pub fn open_with_config(dir: impl AsRef<Path>, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let dir: PathBuf = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| Error::file_io(&dir, e))?;
        let layout = StorageLayout::new(&dir);
        let lock = DirectoryLock::acquire(&layout.lock_file())?;
        Self::assemble(Arc::new(LocalFileSystem::new()), layout, config, Some(lock))
    }

    /// Open a storage that lives in memory only
    pub fn open_in_memory(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        Self::assemble(
            Arc::new(MemoryFileSystem::new()),
            StorageLayout::new("/tessera"),
            config,
            None,
        )
    }

    fn assemble(
        fs: Arc<dyn FileSystem>,
        layout: StorageLayout,
        config: StorageConfig,
        lock: Option<DirectoryLock>,
    ) -> Result<Self> {
        let endian = config.byte_order;
        StorageMeta::read_or_create(
            fs.as_ref(),
            &layout.meta_file(),
            endian,
            config.channel_count,
        )?;

        let type_ids = Arc::new(FileIdProvider::open(
            Arc::clone(&fs),
            layout.type_id_file(),
            TYPE_ID_BASE,
            config.id_batch_size,
        )?);
        let object_ids = Arc::new(FileIdProvider::open(
            Arc::clone(&fs),
            layout.object_id_file(),
            OBJECT_ID_BASE,
            config.id_batch_size,
        )?);

        let types = Arc::new(TypeRegistry::new(type_ids));
        let dictionary = layout.dictionary_file();
        if fs.exists(&dictionary) {
            let bytes = fs.read_all(&dictionary)?;
            let text = String::from_utf8(bytes).map_err(|e| Error::DictionaryParse {
                line: 0,
                message: format!("dictionary is not UTF-8: {}", e),
            })?;
            types.load_dictionary(&text)?;
        }
        let roots_layout = Arc::new(roots_layout()?);
        types.resolve_type_id(&roots_layout)?;

        let ctx = StorageContext::new(
            config.channel_count,
            endian,
            Arc::clone(&fs),
            layout,
            config.evaluator()?,
            config.housekeeping(),
        )?;
        let manager = ChannelManager::open(ctx)?;
        object_ids.ensure_above(manager.max_object_id().as_u64())?;

        let codec = RecordCodec::new(Arc::clone(&types), endian);
        let roots = Entity::blank(roots_layout);
        let inner = Arc::new_cyclic(|self_ref| StorageInner {
            config,
            manager,
            types,
            codec,
            object_ids,
            registry: ObjectRegistry::new(),
            legacy: LegacyHandlerRegistry::new(),
            commit_lock: Mutex::new(()),
            roots,
            layouts: RwLock::new(FxHashMap::default()),
            self_ref: self_ref.clone(),
            _lock: lock,
        });

        inner.persist_dictionary()?;
        if inner.manager.contains(ObjectId::ROOTS) {
            Loader::new(&inner).load_into(ObjectId::ROOTS, Arc::clone(&inner.roots))?;
        } else {
            inner.registry.register(ObjectId::ROOTS, &inner.roots);
        }

        let stats = inner.manager.statistics();
        info!(
            target: "tessera::storage",
            root = %inner.manager.context().layout().root().display(),
            channels = inner.manager.channel_count(),
            types = inner.types.len(),
            entities = stats.entity_count(),
            "Opened storage"
        );
        Ok(Self { inner })
    }

    // ========================================================================
    // Roots
    // ========================================================================

    /// The root entity, if one is set
    pub fn root(&self) -> Option<Arc<Entity>> {
        self.inner.roots.reference("root")
    }

    /// Replace the root entity in memory
    ///
    /// Call [`EmbeddedStorage::store_root`] to persist the change.
    pub fn set_root(&self, root: &Arc<Entity>) -> Result<()> {
        self.inner.roots.set("root", entity_ref(root))?;
        Ok(())
    }

    /// Forget the root entity in memory
    pub fn clear_root(&self) -> Result<()> {
        self.inner.roots.set("root", Value::Ref(None))?;
        Ok(())
    }

    /// Store the roots record and the root entity
    ///
    /// Entities referenced from the root that are already stored are
    /// referenced by id, as with [`EmbeddedStorage::store`].
    pub fn store_root(&self) -> Result<CommitReport> {
        let mut storer = self.create_storer(StorerMode::Lazy);
        storer.store(&self.inner.roots)?;
        if let Some(root) = self.root() {
            storer.store(&root)?;
        }
        storer.commit()
    }

    // ========================================================================
    // Store / load
    // ========================================================================

    /// New store session
    pub fn create_storer(&self, mode: StorerMode) -> Storer<'_> {
        Storer::new(&self.inner, mode)
    }

    /// Store `entity` and its new references, then commit
    pub fn store(&self, entity: &Arc<Entity>) -> Result<ObjectId> {
        self.store_with(entity, StorerMode::Lazy)
    }

    /// Store `entity` and every loaded entity it reaches, then commit
    pub fn store_eager(&self, entity: &Arc<Entity>) -> Result<ObjectId> {
        self.store_with(entity, StorerMode::Eager)
    }

    fn store_with(&self, entity: &Arc<Entity>, mode: StorerMode) -> Result<ObjectId> {
        let mut storer = self.create_storer(mode);
        let object_id = storer.store(entity)?;
        storer.commit()?;
        Ok(object_id)
    }

    /// Entity stored as `object_id`, with its eager references
    ///
    /// Entities already in memory are returned as they are, so loading the
    /// same id twice yields the same instance.
    pub fn load(&self, object_id: ObjectId) -> Result<Arc<Entity>> {
        self.inner.load(object_id)
    }

    /// Object id of a stored or loaded entity
    pub fn object_id_of(&self, entity: &Arc<Entity>) -> Option<ObjectId> {
        self.inner.registry.lookup_object_id(entity)
    }

    /// Delete the records of `object_ids`
    ///
    /// Returns how many records existed. Entities still referencing a deleted
    /// id fail to load afterwards with a dangling reference.
    pub fn delete(&self, object_ids: &[ObjectId]) -> Result<u64> {
        let _guard = self.inner.commit_lock.lock();
        if object_ids.contains(&ObjectId::ROOTS) {
            return Err(Error::invalid_operation("the roots record cannot be deleted"));
        }
        let deleted = self.inner.manager.delete(object_ids)?;
        for object_id in object_ids {
            self.inner.registry.remove(*object_id);
        }
        Ok(deleted)
    }

    // ========================================================================
    // Types
    // ========================================================================

    /// Register layouts ahead of the first store
    ///
    /// Records of older layouts of the same names become legacy records from
    /// then on.
    pub fn register_types(&self, layouts: &[&TypeLayout]) -> Result<Vec<TypeId>> {
        let _guard = self.inner.commit_lock.lock();
        let ids = self.inner.types.resolve_type_ids(layouts)?;
        self.inner.persist_dictionary()?;
        Ok(ids)
    }

    /// Handler mapping legacy records of its type name on load
    pub fn register_legacy_handler(&self, handler: Arc<dyn LegacyTypeHandler>) {
        self.inner.legacy.register(handler);
    }

    /// Type registry of this storage
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.inner.types
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete every entity not reachable from the roots record
    pub fn collect_garbage(&self) -> Result<GcReport> {
        self.inner.ensure_running()?;
        gc::collect_garbage(&self.inner)
    }

    /// Consolidate every file that needs it, on all channels
    pub fn issue_full_housekeeping(&self) -> Result<HousekeepingReport> {
        self.inner.manager.issue_full_housekeeping()
    }

    /// Copy the storage into `target_root`
    ///
    /// The copy opens as a storage of its own. Returns the number of files
    /// copied.
    pub fn backup_to(&self, target_root: impl AsRef<Path>) -> Result<usize> {
        let _guard = self.inner.commit_lock.lock();
        self.inner.ensure_running()?;
        self.inner.manager.backup_to(target_root.as_ref())
    }

    /// Per-channel, per-file inventory
    pub fn file_statistics(&self) -> StorageStatistics {
        self.inner.manager.statistics()
    }

    /// Settings this storage was opened with
    pub fn config(&self) -> &StorageConfig {
        &self.inner.config
    }

    /// Storage directory
    pub fn root_dir(&self) -> &Path {
        self.inner.manager.context().layout().root()
    }

    /// Stop the channel workers
    ///
    /// Further stores, loads and maintenance fail. The directory lock is
    /// released when the last clone is dropped.
    pub fn shutdown(&self) {
        let _guard = self.inner.commit_lock.lock();
        self.inner.manager.shutdown();
    }

    /// True until [`EmbeddedStorage::shutdown`] was called
    pub fn is_running(&self) -> bool {
        !self.inner.manager.is_shut_down()
    }
}

impl std::fmt::Debug for EmbeddedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedStorage")
            .field("root_dir", &self.root_dir())
            .field("channels", &self.inner.manager.channel_count())
            .field("types", &self.inner.types.len())
            .field("running", &self.is_running())
            .finish()
    }
}
