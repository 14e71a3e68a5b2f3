//! Object-graph engine for tessera
//!
//! This crate orchestrates all lower layers:
//! - [`entity`]: the entity envelope (layout + swappable snapshot + hooks)
//! - [`lazy`]: lazily loaded references
//! - [`registry`]: entity <-> object id identity map
//! - [`storer`] / [`loader`]: store and load sessions
//! - [`gc`]: mark-and-delete garbage collection from the roots record
//! - [`storage`]: `EmbeddedStorage`, open/close and the public operations
//! - [`config`]: `tessera.toml`
//!
//! The engine is the only component that knows about:
//! - Live entities and their identity
//! - The roots record
//! - Cross-layer coordination (type dictionary + channels)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod entity;
pub mod gc;
pub mod lazy;
mod loader;
pub mod registry;
pub mod storage;
pub mod storer;

pub use config::StorageConfig;
pub use entity::{entity_ref, lazy_ref, Entity, EntityValue, Reference, UpdateHook, VersionHistory};
pub use gc::GcReport;
pub use lazy::Lazy;
pub use registry::ObjectRegistry;
pub use storage::{roots_layout, EmbeddedStorage, ROOTS_TYPE_NAME};
pub use storer::{Storer, StorerMode};
