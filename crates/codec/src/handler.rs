//! Per-type record handler
//!
//! A [`RecordHandler`] turns the field values of one type into a binary record
//! and back, using the type's [`TypeDescription`]:
//!
//! - fixed fields (primitives, references) in declaration order
//! - then each variable field (arrays, text) as `[count: i64][elements]`
//!
//! Decoding never guesses: the bytes consumed must equal the declared entity
//! length exactly, otherwise the record is reported as inconsistent.

use crate::reader::RecordReader;
use crate::record::{RecordHeader, HEADER_LENGTH};
use crate::writer::RecordWriter;
use smallvec::SmallVec;
use std::sync::Arc;
use tessera_core::{Endianness, Error, ObjectId, PrimitiveKind, Result, Value};
use tessera_types::{ElementKind, FieldKind, TypeDescription};

/// Object ids embedded in one record
pub type ReferenceList = SmallVec<[ObjectId; 8]>;

/// A record decoded into field values
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Record header
    pub header: RecordHeader,
    /// Field values in declaration order
    pub values: Vec<Value>,
}

/// Encoder/decoder for one type description
#[derive(Debug, Clone)]
pub struct RecordHandler {
    desc: Arc<TypeDescription>,
    endian: Endianness,
}

impl RecordHandler {
    /// Handler for `desc` writing in `endian` byte order
    pub fn new(desc: Arc<TypeDescription>, endian: Endianness) -> Self {
        Self { desc, endian }
    }

    /// The handled description
    pub fn description(&self) -> &Arc<TypeDescription> {
        &self.desc
    }

    /// Exact record length for `values`
    pub fn record_length(&self, values: &[Value]) -> u64 {
        let mut length = HEADER_LENGTH + self.desc.fixed_length();
        for (field, value) in self.desc.fields().iter().zip(values) {
            if field.kind().is_variable() {
                length += 8 + variable_payload(field.kind(), value);
            }
        }
        length
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Append the record of `object_id` with `values` to `out`
    ///
    /// Returns the record length.
    pub fn encode(&self, object_id: ObjectId, values: &[Value], out: &mut Vec<u8>) -> Result<u64> {
        if object_id.is_null() {
            return Err(Error::invalid_operation(format!(
                "cannot store an instance of {} without an object id",
                self.desc.type_name()
            )));
        }
        self.check_values(values)?;

        let mut writer = RecordWriter::begin(out, self.endian, self.desc.type_id(), object_id);
        for (field, value) in self.desc.fields().iter().zip(values) {
            if !field.kind().is_variable() {
                write_fixed(&mut writer, value);
            }
        }
        for (field, value) in self.desc.fields().iter().zip(values) {
            if field.kind().is_variable() {
                write_variable(&mut writer, value);
            }
        }
        Ok(writer.finish())
    }

    fn check_values(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.desc.fields().len() {
            return Err(self.mismatch(format!(
                "expected {} values, got {}",
                self.desc.fields().len(),
                values.len()
            )));
        }
        for (field, value) in self.desc.fields().iter().zip(values) {
            if !field.kind().accepts(value) {
                return Err(self.mismatch(format!(
                    "field {} of kind {} cannot hold a {} value",
                    field.name(),
                    field.kind(),
                    value.kind_name()
                )));
            }
        }
        Ok(())
    }

    fn mismatch(&self, detail: String) -> Error {
        Error::LayoutMismatch {
            type_id: self.desc.type_id(),
            type_name: self.desc.type_name().to_string(),
            detail,
        }
    }

    // ========================================================================
    // Decoding
    // ========================================================================

    /// Decode the record at the start of `record`
    pub fn decode(&self, record: &[u8]) -> Result<DecodedRecord> {
        let header = self.read_header(record)?;
        let body = &record[..header.length as usize];
        let mut reader = RecordReader::new(body, HEADER_LENGTH as usize, self.endian);

        let fields = self.desc.fields();
        let mut slots: Vec<Option<Value>> = vec![None; fields.len()];
        let result = (|| -> Result<()> {
            for (slot, field) in slots.iter_mut().zip(fields) {
                if !field.kind().is_variable() {
                    *slot = Some(self.read_fixed(&mut reader, field.kind())?);
                }
            }
            for (slot, field) in slots.iter_mut().zip(fields) {
                if field.kind().is_variable() {
                    *slot = Some(self.read_variable(&mut reader, field.kind())?);
                }
            }
            Ok(())
        })();

        match result {
            Err(Error::TruncatedRecord { offset, needed, .. }) => {
                return Err(Error::EntityLengthMismatch {
                    object_id: header.object_id,
                    type_id: header.type_id,
                    declared: header.length as i64,
                    consumed: offset + needed,
                })
            }
            other => other?,
        }

        let consumed = reader.position();
        if consumed != header.length {
            return Err(Error::EntityLengthMismatch {
                object_id: header.object_id,
                type_id: header.type_id,
                declared: header.length as i64,
                consumed,
            });
        }
        let values = slots.into_iter().map(|slot| slot.unwrap_or(Value::Ref(None))).collect();
        Ok(DecodedRecord { header, values })
    }

    fn read_header(&self, record: &[u8]) -> Result<RecordHeader> {
        let header = RecordHeader::read(record, self.endian)?;
        if header.type_id != self.desc.type_id() {
            return Err(self.mismatch(format!(
                "record of object {} has type id {}",
                header.object_id, header.type_id
            )));
        }
        if header.length > record.len() as u64 {
            return Err(Error::TruncatedRecord {
                offset: 0,
                needed: header.length,
                available: record.len() as u64,
            });
        }
        Ok(header)
    }

    fn read_fixed(&self, reader: &mut RecordReader<'_>, kind: &FieldKind) -> Result<Value> {
        match kind {
            FieldKind::Primitive(primitive) => self.read_primitive(reader, *primitive),
            _ => Ok(Value::Ref(reader.get_reference()?)),
        }
    }

    fn read_primitive(&self, reader: &mut RecordReader<'_>, kind: PrimitiveKind) -> Result<Value> {
        Ok(match kind {
            PrimitiveKind::Bool => match reader.get_u8()? {
                0 => Value::Bool(false),
                1 => Value::Bool(true),
                other => return Err(self.mismatch(format!("invalid bool byte {}", other))),
            },
            PrimitiveKind::Byte => Value::Byte(reader.get_i8()?),
            PrimitiveKind::Short => Value::Short(reader.get_i16()?),
            PrimitiveKind::Char => {
                let raw = reader.get_u32()?;
                Value::Char(
                    char::from_u32(raw)
                        .ok_or_else(|| self.mismatch(format!("invalid char {:#x}", raw)))?,
                )
            }
            PrimitiveKind::Int => Value::Int(reader.get_i32()?),
            PrimitiveKind::Float => Value::Float(reader.get_f32()?),
            PrimitiveKind::Long => Value::Long(reader.get_i64()?),
            PrimitiveKind::Double => Value::Double(reader.get_f64()?),
        })
    }

    fn read_variable(&self, reader: &mut RecordReader<'_>, kind: &FieldKind) -> Result<Value> {
        match kind {
            FieldKind::Text => {
                let count = reader.get_count(1)?;
                let bytes = reader.take(count)?;
                let text = std::str::from_utf8(bytes)
                    .map_err(|e| self.mismatch(format!("invalid UTF-8 text: {}", e)))?;
                Ok(Value::Text(text.to_string()))
            }
            FieldKind::Array(element) => {
                let count = reader.get_count(element.width())?;
                let mut items = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    items.push(match element {
                        ElementKind::Primitive(primitive) => {
                            self.read_primitive(reader, *primitive)?
                        }
                        ElementKind::Reference { .. } => Value::Ref(reader.get_reference()?),
                    });
                }
                Ok(Value::Array(items))
            }
            other => self.read_fixed(reader, other),
        }
    }

    // ========================================================================
    // Reference iteration
    // ========================================================================

    /// Visit every non-null object id in `record` without decoding it
    ///
    /// Lazy references are only visited when `include_lazy` is set.
    pub fn iterate_references(
        &self,
        record: &[u8],
        include_lazy: bool,
        visitor: &mut impl FnMut(ObjectId),
    ) -> Result<()> {
        let header = self.read_header(record)?;
        let body = &record[..header.length as usize];
        let fields = self.desc.fields();

        for (index, field) in fields.iter().enumerate() {
            if !matches!(field.kind(), FieldKind::Reference { .. }) {
                continue;
            }
            if field.kind().is_lazy() && !include_lazy {
                continue;
            }
            if let Some(offset) = self.desc.fixed_offset(index) {
                let mut reader =
                    RecordReader::new(body, (HEADER_LENGTH + offset) as usize, self.endian);
                if let Some(id) = reader.get_reference()? {
                    visitor(id);
                }
            }
        }

        if self.desc.variable_count() == 0 {
            return Ok(());
        }
        let tail_start = HEADER_LENGTH + self.desc.fixed_length();
        let mut reader = RecordReader::new(body, tail_start as usize, self.endian);
        for field in fields.iter().filter(|f| f.kind().is_variable()) {
            match field.kind() {
                FieldKind::Array(ElementKind::Reference { .. }) => {
                    let count = reader.get_count(8)?;
                    for _ in 0..count {
                        if let Some(id) = reader.get_reference()? {
                            visitor(id);
                        }
                    }
                }
                FieldKind::Array(ElementKind::Primitive(primitive)) => {
                    let count = reader.get_count(primitive.width())?;
                    reader.skip(count * primitive.width())?;
                }
                _ => {
                    let count = reader.get_count(1)?;
                    reader.skip(count)?;
                }
            }
        }
        Ok(())
    }

    /// Collect the object ids [`RecordHandler::iterate_references`] visits
    pub fn references(&self, record: &[u8], include_lazy: bool) -> Result<ReferenceList> {
        let mut refs = ReferenceList::new();
        self.iterate_references(record, include_lazy, &mut |id| refs.push(id))?;
        Ok(refs)
    }
}

fn write_fixed(writer: &mut RecordWriter<'_>, value: &Value) {
    match value {
        Value::Bool(v) => writer.put_bool(*v),
        Value::Byte(v) => writer.put_i8(*v),
        Value::Short(v) => writer.put_i16(*v),
        Value::Char(v) => writer.put_char(*v),
        Value::Int(v) => writer.put_i32(*v),
        Value::Float(v) => writer.put_f32(*v),
        Value::Long(v) => writer.put_i64(*v),
        Value::Double(v) => writer.put_f64(*v),
        Value::Ref(target) => writer.put_reference(*target),
        // Tail values never reach the fixed block; kinds were checked
        Value::Array(_) | Value::Text(_) => {}
    }
}

fn write_variable(writer: &mut RecordWriter<'_>, value: &Value) {
    match value {
        Value::Text(text) => {
            writer.put_count(text.len());
            writer.put_bytes(text.as_bytes());
        }
        Value::Array(items) => {
            writer.put_count(items.len());
            for item in items {
                write_fixed(writer, item);
            }
        }
        other => write_fixed(writer, other),
    }
}

fn variable_payload(kind: &FieldKind, value: &Value) -> u64 {
    match (kind, value) {
        (FieldKind::Text, Value::Text(text)) => text.len() as u64,
        (FieldKind::Array(element), Value::Array(items)) => items.len() as u64 * element.width(),
        _ => 0,
    }
}
