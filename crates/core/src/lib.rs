//! Core types for tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - ObjectId / TypeId: persistent surrogate keys
//! - IdProvider: monotonic id allocation
//! - Value: pseudo-field state, generic over the reference representation
//! - Endianness: dataset-wide byte order
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod endian;
pub mod error;
pub mod ids;
pub mod value;

pub use endian::Endianness;
pub use error::{Error, Result};
pub use ids::{
    IdProvider, MemoryIdProvider, ObjectId, TypeId, OBJECT_ID_BASE, ROOTS_OBJECT_ID, TYPE_ID_BASE,
};
pub use value::{PrimitiveKind, Value};
