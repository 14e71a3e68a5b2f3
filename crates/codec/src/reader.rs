//! Bounds-checked cursor over one record

use tessera_core::{Endianness, Error, ObjectId, Result};

/// Cursor over the bytes of a single record
pub struct RecordReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    endian: Endianness,
}

impl<'a> RecordReader<'a> {
    /// Cursor at `pos` inside `bytes`
    pub fn new(bytes: &'a [u8], pos: usize, endian: Endianness) -> Self {
        Self { bytes, pos, endian }
    }

    /// Current position
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> u64 {
        (self.bytes.len() - self.pos) as u64
    }

    /// Take the next `n` bytes
    pub fn take(&mut self, n: u64) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::TruncatedRecord {
                offset: self.pos as u64,
                needed: n,
                available: self.remaining(),
            });
        }
        let start = self.pos;
        self.pos += n as usize;
        Ok(&self.bytes[start..self.pos])
    }

    /// Skip `n` bytes
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.take(n).map(|_| ())
    }

    /// 1 byte as raw bool byte
    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// 1 byte signed
    pub fn get_i8(&mut self) -> Result<i8> {
        Ok(self.get_u8()? as i8)
    }

    /// 2 bytes
    pub fn get_i16(&mut self) -> Result<i16> {
        let endian = self.endian;
        Ok(endian.read_i16(self.take(2)?))
    }

    /// 4 bytes
    pub fn get_i32(&mut self) -> Result<i32> {
        let endian = self.endian;
        Ok(endian.read_i32(self.take(4)?))
    }

    /// 4 bytes
    pub fn get_u32(&mut self) -> Result<u32> {
        let endian = self.endian;
        Ok(endian.read_u32(self.take(4)?))
    }

    /// 4 bytes
    pub fn get_f32(&mut self) -> Result<f32> {
        let endian = self.endian;
        Ok(endian.read_f32(self.take(4)?))
    }

    /// 8 bytes
    pub fn get_i64(&mut self) -> Result<i64> {
        let endian = self.endian;
        Ok(endian.read_i64(self.take(8)?))
    }

    /// 8 bytes
    pub fn get_f64(&mut self) -> Result<f64> {
        let endian = self.endian;
        Ok(endian.read_f64(self.take(8)?))
    }

    /// 8-byte object id, `None` for 0
    pub fn get_reference(&mut self) -> Result<Option<ObjectId>> {
        let endian = self.endian;
        Ok(ObjectId::new(endian.read_u64(self.take(8)?)).non_null())
    }

    /// Element count of a tail field, checked against the remaining bytes
    pub fn get_count(&mut self, element_width: u64) -> Result<u64> {
        let at = self.pos as u64;
        let count = self.get_i64()?;
        if count < 0 {
            return Err(Error::invalid_operation(format!(
                "negative element count {} at offset {}",
                count, at
            )));
        }
        let count = count as u64;
        let needed = count.saturating_mul(element_width);
        if needed > self.remaining() {
            return Err(Error::TruncatedRecord {
                offset: self.pos as u64,
                needed,
                available: self.remaining(),
            });
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_past_end() {
        let bytes = [1u8, 2, 3];
        let mut reader = RecordReader::new(&bytes, 1, Endianness::Little);
        assert_eq!(reader.remaining(), 2);
        assert!(matches!(
            reader.take(3),
            Err(Error::TruncatedRecord { offset: 1, needed: 3, available: 2 })
        ));
        assert_eq!(reader.take(2).unwrap(), &[2, 3]);
    }

    #[test]
    fn test_count_checked_against_remaining() {
        let mut bytes = vec![0u8; 8];
        Endianness::Little.write_i64(&mut bytes, 1_000);
        bytes.extend_from_slice(&[0u8; 16]);
        let mut reader = RecordReader::new(&bytes, 0, Endianness::Little);
        assert!(matches!(
            reader.get_count(8),
            Err(Error::TruncatedRecord { .. })
        ));
    }
}
