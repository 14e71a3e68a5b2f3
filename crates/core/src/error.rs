//! Error types for tessera
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! The variants fall into four groups:
//!
//! - **Configuration / consistency**: unknown or unresolvable types, layout
//!   mismatches, illegal entity lengths. Always fatal, never retried.
//! - **I/O**: read/write failures surfaced to the calling operation.
//! - **Reference resolution**: dangling object ids at the end of a load.
//! - **Legacy mapping**: a legacy type handler could not rebuild an instance.
//!
//! Consistency errors carry the context needed to locate the damage
//! (entity length, object id, type id, channel, file number, offset).

use crate::ids::{ObjectId, TypeId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for tessera
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error without further location context
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// I/O error on a specific file
    #[error("I/O error on '{}': {source}", path.display())]
    FileIo {
        /// File the operation was performed on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A type id has no description in the type registry
    #[error("Unknown type id {0}")]
    UnknownTypeId(TypeId),

    /// A field refers to a complex type that is not registered
    #[error("Unresolvable type '{type_name}' referenced by {referenced_by}")]
    UnresolvableType {
        /// Name of the missing type
        type_name: String,
        /// Type and field that referenced it
        referenced_by: String,
    },

    /// Instance state does not fit the persisted layout
    #[error("Layout mismatch for type {type_name} ({type_id}): {detail}")]
    LayoutMismatch {
        /// Type id of the layout
        type_id: TypeId,
        /// Qualified type name
        type_name: String,
        /// What did not match
        detail: String,
    },

    /// Entity length that can never be valid (zero, or shorter than a header)
    #[error("Invalid entity length {length} at channel {channel} file {file_number} offset {offset}")]
    InvalidEntityLength {
        /// Declared length
        length: i64,
        /// Channel index
        channel: usize,
        /// Data file number
        file_number: u64,
        /// Position of the record in the file
        offset: u64,
    },

    /// Declared entity length differs from the bytes consumed while decoding
    #[error(
        "Entity length mismatch for object {object_id} of type {type_id}: declared {declared}, consumed {consumed}"
    )]
    EntityLengthMismatch {
        /// Object id of the record
        object_id: ObjectId,
        /// Type id of the record
        type_id: TypeId,
        /// Length stored in the header
        declared: i64,
        /// Bytes actually consumed
        consumed: u64,
    },

    /// Record extends past the available bytes
    #[error("Truncated record at offset {offset}: need {needed} bytes, have {available}")]
    TruncatedRecord {
        /// Position of the record
        offset: u64,
        /// Bytes the record declares
        needed: u64,
        /// Bytes available
        available: u64,
    },

    /// Record found at a location does not belong to the expected object
    #[error(
        "Object id mismatch at channel {channel} file {file_number} offset {offset}: expected {expected}, found {found}"
    )]
    ObjectIdMismatch {
        /// Object id that was requested
        expected: ObjectId,
        /// Object id stored in the record
        found: ObjectId,
        /// Channel index
        channel: usize,
        /// Data file number
        file_number: u64,
        /// Record position
        offset: u64,
    },

    /// Read beyond the declared length of a data file
    #[error(
        "Read beyond file end: channel {channel} file {file_number} position {position} length {length} (file length {file_length})"
    )]
    ReadBeyondFile {
        /// Channel index
        channel: usize,
        /// Data file number
        file_number: u64,
        /// Requested position
        position: u64,
        /// Requested length
        length: u64,
        /// Declared file length
        file_length: u64,
    },

    /// Type dictionary text could not be parsed
    #[error("Type dictionary parse error at line {line}: {message}")]
    DictionaryParse {
        /// 1-based line number
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// A reference could not be resolved by the end of a load
    #[error("Dangling reference to object {object_id} (referenced by {referenced_by})")]
    DanglingReference {
        /// The unresolvable id
        object_id: ObjectId,
        /// The object holding the reference
        referenced_by: ObjectId,
    },

    /// A legacy type handler failed or is missing
    #[error("Legacy type mapping failed for object {object_id} of type {type_id}: {reason}")]
    LegacyMapping {
        /// Legacy type id of the record
        type_id: TypeId,
        /// Object being mapped
        object_id: ObjectId,
        /// Failure description
        reason: String,
    },

    /// No persisted record exists for an object id
    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    /// One or more channels failed during a fan-out operation
    #[error("Channel {channel} failed: {message}")]
    ChannelFailure {
        /// Channel index
        channel: usize,
        /// Failure description
        message: String,
    },

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Wrap an I/O error with the file it happened on
    pub fn file_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::FileIo {
            path: path.into(),
            source,
        }
    }

    /// Shorthand for [`Error::Configuration`]
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Shorthand for [`Error::InvalidOperation`]
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Error::InvalidOperation(message.into())
    }

    /// True for configuration and consistency violations.
    ///
    /// These indicate damaged data or an incomplete setup and must never be
    /// retried.
    pub fn is_consistency(&self) -> bool {
        matches!(
            self,
            Error::Configuration(_)
                | Error::UnknownTypeId(_)
                | Error::UnresolvableType { .. }
                | Error::LayoutMismatch { .. }
                | Error::InvalidEntityLength { .. }
                | Error::EntityLengthMismatch { .. }
                | Error::TruncatedRecord { .. }
                | Error::ObjectIdMismatch { .. }
                | Error::ReadBeyondFile { .. }
                | Error::DictionaryParse { .. }
        )
    }

    /// True for I/O failures
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_) | Error::FileIo { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::Io(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        let msg = err.to_string();
        assert!(msg.contains("I/O error"));
        assert!(err.is_io());
    }

    #[test]
    fn test_error_display_file_io_names_path() {
        let err = Error::file_io(
            "/data/channel_0/channel_0_1.dat",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("channel_0_1.dat"));
        assert!(err.is_io());
    }

    #[test]
    fn test_entity_length_mismatch_carries_context() {
        let err = Error::EntityLengthMismatch {
            object_id: ObjectId::new(1_000_000_000_000_000_001),
            type_id: TypeId::new(1_000_042),
            declared: 64,
            consumed: 56,
        };
        let msg = err.to_string();
        assert!(msg.contains("1000000000000000001"));
        assert!(msg.contains("1000042"));
        assert!(msg.contains("64"));
        assert!(msg.contains("56"));
        assert!(err.is_consistency());
    }

    #[test]
    fn test_invalid_entity_length_display() {
        let err = Error::InvalidEntityLength {
            length: 0,
            channel: 2,
            file_number: 7,
            offset: 4096,
        };
        let msg = err.to_string();
        assert!(msg.contains("channel 2"));
        assert!(msg.contains("file 7"));
        assert!(msg.contains("offset 4096"));
    }

    #[test]
    fn test_dangling_reference_is_not_consistency() {
        let err = Error::DanglingReference {
            object_id: ObjectId::new(5),
            referenced_by: ObjectId::new(6),
        };
        assert!(!err.is_consistency());
        assert!(!err.is_io());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
