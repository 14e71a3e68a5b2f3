//! Type descriptor registry for tessera
//!
//! - [`layout`]: explicit pseudo-field layouts declared per type
//! - [`description`]: a layout bound to its persistent [`tessera_core::TypeId`]
//! - [`registry`]: layout -> type id resolution and type id -> description lookup
//! - [`dictionary`]: the human-readable dictionary text format
//! - [`legacy`]: pluggable mapping of old layouts into current ones

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod description;
pub mod dictionary;
pub mod layout;
pub mod legacy;
pub mod registry;

pub use description::TypeDescription;
pub use layout::{
    ElementKind, FieldKind, PseudoField, TypeLayout, TypeLayoutBuilder, COUNT_WIDTH,
    REFERENCE_WIDTH,
};
pub use legacy::{FieldMapping, LegacyHandlerRegistry, LegacyTypeHandler};
pub use registry::TypeRegistry;
