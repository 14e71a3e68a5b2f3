//! Persistent identifiers
//!
//! - [`ObjectId`]: surrogate key of one stored instance
//! - [`TypeId`]: surrogate key of one persisted type layout
//!
//! Both are positive 64-bit integers written as 8 bytes in every record
//! header. Zero is the null value. Ids are allocated monotonically by an
//! [`IdProvider`]; the ranges are disjoint so that a stray type id can never
//! be mistaken for an object id.

use crate::error::Result;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// First TypeId handed out by a fresh provider
pub const TYPE_ID_BASE: u64 = 1_000_000;

/// Reserved ObjectId of the built-in roots record
pub const ROOTS_OBJECT_ID: u64 = 1_000_000_000_000_000_000;

/// First ObjectId handed out by a fresh provider
pub const OBJECT_ID_BASE: u64 = ROOTS_OBJECT_ID + 1;

/// Persistent identifier of one stored instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(u64);

impl ObjectId {
    /// The null reference
    pub const NULL: ObjectId = ObjectId(0);

    /// Id of the built-in roots record
    pub const ROOTS: ObjectId = ObjectId(ROOTS_OBJECT_ID);

    /// Wrap a raw value
    #[inline]
    pub const fn new(value: u64) -> Self {
        ObjectId(value)
    }

    /// Raw value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True for the null reference
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// `None` for the null id
    #[inline]
    pub fn non_null(self) -> Option<ObjectId> {
        if self.is_null() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistent identifier of one type layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TypeId(u64);

impl TypeId {
    /// Unassigned type id
    pub const NULL: TypeId = TypeId(0);

    /// Wrap a raw value
    #[inline]
    pub const fn new(value: u64) -> Self {
        TypeId(value)
    }

    /// Raw value
    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// True if unassigned
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Id Providers
// ============================================================================

/// Monotonic id allocator
///
/// Implementations must never return the same value twice, including across
/// restarts of the process for persistent providers.
pub trait IdProvider: Send + Sync {
    /// Allocate the next id
    fn next_id(&self) -> Result<u64>;

    /// The id the next call to [`IdProvider::next_id`] would return
    fn peek(&self) -> u64;

    /// Make sure ids up to and including `id` are never handed out
    ///
    /// Used at startup when the storage reports the highest id it has seen.
    fn ensure_above(&self, id: u64) -> Result<()>;
}

/// Volatile id provider backed by an atomic counter
#[derive(Debug)]
pub struct MemoryIdProvider {
    next: AtomicU64,
}

impl MemoryIdProvider {
    /// Create a provider starting at `first`
    pub fn new(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Provider for type ids
    pub fn for_types() -> Self {
        Self::new(TYPE_ID_BASE)
    }

    /// Provider for object ids
    pub fn for_objects() -> Self {
        Self::new(OBJECT_ID_BASE)
    }
}

impl IdProvider for MemoryIdProvider {
    fn next_id(&self) -> Result<u64> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed))
    }

    fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    fn ensure_above(&self, id: u64) -> Result<()> {
        self.next.fetch_max(id.saturating_add(1), Ordering::Relaxed);
        Ok(())
    }
}
