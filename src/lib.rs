//! Tessera - Embedded object-graph persistence
//!
//! Tessera stores live object graphs in channel-partitioned binary data files
//! and loads them back with identity preserved: shared references load as one
//! instance and cycles load as cycles.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tessera::{entity_ref, EmbeddedStorage, Entity, TypeLayout, Value};
//!
//! let storage = EmbeddedStorage::open("./data")?;
//!
//! let layout = Arc::new(TypeLayout::builder("app.Node").long("value").reference("next").build()?);
//! let a = Entity::new(layout.clone(), vec![Value::Long(1), Value::Ref(None)])?;
//! let b = Entity::new(layout, vec![Value::Long(2), entity_ref(&a)])?;
//! a.set("next", entity_ref(&b))?;
//!
//! storage.set_root(&a)?;
//! storage.store_root()?;
//! ```
//!
//! # Architecture
//!
//! - `tessera-core`: ids, values, errors
//! - `tessera-types`: type layouts, the type registry and its dictionary
//! - `tessera-codec`: the binary record format
//! - `tessera-storage`: channels, data files, housekeeping
//! - `tessera-engine`: entities, store/load sessions, the storage facade

pub use tessera_core::{Endianness, Error, ObjectId, PrimitiveKind, Result, TypeId, Value};
pub use tessera_engine::*;
pub use tessera_storage::{
    CommitReport, FileStatistics, HousekeepingReport, StorageStatistics,
};
pub use tessera_types::{
    ElementKind, FieldKind, FieldMapping, LegacyTypeHandler, TypeDescription, TypeLayout,
};
