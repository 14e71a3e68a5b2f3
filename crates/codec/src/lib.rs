//! Binary record codec for tessera
//!
//! - [`record`]: the 24-byte header and gap markers
//! - [`writer`] / [`reader`]: byte-order aware cursors
//! - [`handler`]: per-type encode, decode and reference iteration
//! - [`registry`]: handler dispatch by the type id in a record header
//! - [`scan`]: record-by-record walk over raw data file bytes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod handler;
pub mod reader;
pub mod record;
pub mod registry;
pub mod scan;
pub mod writer;

pub use handler::{DecodedRecord, RecordHandler, ReferenceList};
pub use record::{gap_marker, gap_record, RecordHeader, HEADER_LENGTH, LENGTH_FIELD};
pub use registry::RecordCodec;
pub use scan::{EntityScanner, ScanEntry};
