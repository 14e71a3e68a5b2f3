//! Handler dispatch by type id
//!
//! [`RecordCodec`] reads the type id from a record header, looks up the
//! description in the [`TypeRegistry`] and caches one [`RecordHandler`] per
//! type id. Handlers are immutable, so the cache only ever grows.

use crate::handler::{DecodedRecord, RecordHandler, ReferenceList};
use crate::record::RecordHeader;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::{Endianness, ObjectId, Result, TypeId, Value};
use tessera_types::TypeRegistry;

/// Type-dispatching codec for all records of one storage
pub struct RecordCodec {
    types: Arc<TypeRegistry>,
    endian: Endianness,
    handlers: RwLock<FxHashMap<TypeId, Arc<RecordHandler>>>,
}

impl RecordCodec {
    /// Codec over `types` using `endian`
    pub fn new(types: Arc<TypeRegistry>, endian: Endianness) -> Self {
        Self {
            types,
            endian,
            handlers: RwLock::new(FxHashMap::default()),
        }
    }

    /// Byte order of every record
    pub fn endian(&self) -> Endianness {
        self.endian
    }

    /// The type registry handlers are built from
    pub fn types(&self) -> &Arc<TypeRegistry> {
        &self.types
    }

    /// Handler for a registered type id
    pub fn handler(&self, type_id: TypeId) -> Result<Arc<RecordHandler>> {
        if let Some(handler) = self.handlers.read().get(&type_id) {
            return Ok(Arc::clone(handler));
        }
        let desc = self.types.describe(type_id)?;
        let handler = Arc::new(RecordHandler::new(desc, self.endian));
        Ok(Arc::clone(
            self.handlers.write().entry(type_id).or_insert(handler),
        ))
    }

    /// Read just the header of `record`
    pub fn header(&self, record: &[u8]) -> Result<RecordHeader> {
        RecordHeader::read(record, self.endian)
    }

    /// Append a record for `object_id` of type `type_id`
    pub fn encode(
        &self,
        type_id: TypeId,
        object_id: ObjectId,
        values: &[Value],
        out: &mut Vec<u8>,
    ) -> Result<u64> {
        self.handler(type_id)?.encode(object_id, values, out)
    }

    /// Decode a record of any registered type
    pub fn decode(&self, record: &[u8]) -> Result<DecodedRecord> {
        let header = self.header(record)?;
        self.handler(header.type_id)?.decode(record)
    }

    /// Visit the object ids in a record of any registered type
    pub fn iterate_references(
        &self,
        record: &[u8],
        include_lazy: bool,
        visitor: &mut impl FnMut(ObjectId),
    ) -> Result<()> {
        let header = self.header(record)?;
        self.handler(header.type_id)?
            .iterate_references(record, include_lazy, visitor)
    }

    /// Collect the object ids in a record of any registered type
    pub fn references(&self, record: &[u8], include_lazy: bool) -> Result<ReferenceList> {
        let header = self.header(record)?;
        self.handler(header.type_id)?.references(record, include_lazy)
    }
}

impl std::fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCodec")
            .field("endian", &self.endian)
            .field("cached_handlers", &self.handlers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{Error, MemoryIdProvider};
    use tessera_types::TypeLayout;

    #[test]
    fn test_dispatch_by_header() {
        let types = Arc::new(TypeRegistry::new(Arc::new(MemoryIdProvider::for_types())));
        let point = TypeLayout::builder("app.Point").int("x").int("y").build().unwrap();
        let named = TypeLayout::builder("app.Named").text("name").build().unwrap();
        let point_id = types.resolve_type_id(&point).unwrap();
        let named_id = types.resolve_type_id(&named).unwrap();
        let codec = RecordCodec::new(Arc::clone(&types), Endianness::Big);

        let mut buf = Vec::new();
        let first = codec
            .encode(point_id, ObjectId::new(1), &[Value::Int(3), Value::Int(4)], &mut buf)
            .unwrap();
        codec
            .encode(named_id, ObjectId::new(2), &[Value::Text("n".into())], &mut buf)
            .unwrap();

        let a = codec.decode(&buf).unwrap();
        assert_eq!(a.values, vec![Value::Int(3), Value::Int(4)]);
        let b = codec.decode(&buf[first as usize..]).unwrap();
        assert_eq!(b.header.type_id, named_id);
    }

    #[test]
    fn test_unknown_type_id() {
        let types = Arc::new(TypeRegistry::new(Arc::new(MemoryIdProvider::for_types())));
        let codec = RecordCodec::new(types, Endianness::Little);
        let mut record = vec![0u8; 24];
        let header = RecordHeader {
            length: 24,
            type_id: TypeId::new(1_234_567),
            object_id: ObjectId::new(1),
        };
        header.write(&mut record, Endianness::Little);
        assert!(matches!(codec.decode(&record), Err(Error::UnknownTypeId(_))));
    }
}
