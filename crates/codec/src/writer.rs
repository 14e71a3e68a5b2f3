//! Record writer
//!
//! Appends one record to a shared batch buffer. The header is reserved first
//! and the entity length is patched in by [`RecordWriter::finish`] once the
//! payload is complete.

use crate::record::{RecordHeader, HEADER_LENGTH};
use tessera_core::{Endianness, ObjectId, TypeId};

/// Appends a single record to a byte buffer
pub struct RecordWriter<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
    endian: Endianness,
    type_id: TypeId,
    object_id: ObjectId,
}

impl<'a> RecordWriter<'a> {
    /// Reserve a header at the end of `buf`
    pub fn begin(
        buf: &'a mut Vec<u8>,
        endian: Endianness,
        type_id: TypeId,
        object_id: ObjectId,
    ) -> Self {
        let start = buf.len();
        buf.resize(start + HEADER_LENGTH as usize, 0);
        Self {
            buf,
            start,
            endian,
            type_id,
            object_id,
        }
    }

    /// Bytes written for this record so far, header included
    pub fn written(&self) -> u64 {
        (self.buf.len() - self.start) as u64
    }

    fn put<const N: usize>(&mut self, fill: impl FnOnce(&mut [u8])) {
        let mut scratch = [0u8; N];
        fill(&mut scratch);
        self.buf.extend_from_slice(&scratch);
    }

    /// 1 byte, 0 or 1
    pub fn put_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    /// 1 byte
    pub fn put_i8(&mut self, value: i8) {
        self.buf.push(value as u8);
    }

    /// 2 bytes
    pub fn put_i16(&mut self, value: i16) {
        let endian = self.endian;
        self.put::<2>(|b| endian.write_i16(b, value));
    }

    /// 4 bytes, the scalar value
    pub fn put_char(&mut self, value: char) {
        self.put_u32(u32::from(value));
    }

    /// 4 bytes
    pub fn put_i32(&mut self, value: i32) {
        let endian = self.endian;
        self.put::<4>(|b| endian.write_i32(b, value));
    }

    /// 4 bytes
    pub fn put_u32(&mut self, value: u32) {
        let endian = self.endian;
        self.put::<4>(|b| endian.write_u32(b, value));
    }

    /// 4 bytes
    pub fn put_f32(&mut self, value: f32) {
        let endian = self.endian;
        self.put::<4>(|b| endian.write_f32(b, value));
    }

    /// 8 bytes
    pub fn put_i64(&mut self, value: i64) {
        let endian = self.endian;
        self.put::<8>(|b| endian.write_i64(b, value));
    }

    /// 8 bytes
    pub fn put_f64(&mut self, value: f64) {
        let endian = self.endian;
        self.put::<8>(|b| endian.write_f64(b, value));
    }

    /// 8-byte object id, 0 for null
    pub fn put_reference(&mut self, target: Option<ObjectId>) {
        let raw = target.map(|id| id.as_u64()).unwrap_or(0);
        let endian = self.endian;
        self.put::<8>(|b| endian.write_u64(b, raw));
    }

    /// Element count prefix of a tail field
    pub fn put_count(&mut self, count: usize) {
        self.put_i64(count as i64);
    }

    /// Raw bytes
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Patch the entity length and return it
    pub fn finish(self) -> u64 {
        let length = self.written();
        let header = RecordHeader {
            length,
            type_id: self.type_id,
            object_id: self.object_id,
        };
        let end = self.start + HEADER_LENGTH as usize;
        header.write(&mut self.buf[self.start..end], self.endian);
        length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_patches_length() {
        let mut buf = vec![0xAA; 3];
        let mut writer =
            RecordWriter::begin(&mut buf, Endianness::Little, TypeId::new(7), ObjectId::new(9));
        writer.put_i64(1);
        writer.put_bool(true);
        let length = writer.finish();
        assert_eq!(length, 33);
        assert_eq!(buf.len(), 36);
        let header = RecordHeader::read(&buf[3..], Endianness::Little).unwrap();
        assert_eq!(header.length, 33);
        assert_eq!(header.object_id, ObjectId::new(9));
    }

    #[test]
    fn test_null_reference_is_zero() {
        let mut buf = Vec::new();
        let mut writer =
            RecordWriter::begin(&mut buf, Endianness::Big, TypeId::new(1), ObjectId::new(2));
        writer.put_reference(None);
        writer.finish();
        assert_eq!(&buf[24..32], &[0u8; 8]);
    }
}
