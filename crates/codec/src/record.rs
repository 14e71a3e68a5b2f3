//! Binary record layout
//!
//! ```text
//! Record Layout:
//! ┌────────────────────┬────────────────┬──────────────────┐
//! │ entityLength (i64) │ typeId (u64)   │ objectId (u64)   │
//! ├────────────────────┴────────────────┴──────────────────┤
//! │ fixed pseudo-fields, declaration order                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ tail: per variable field [count: i64][elements]         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! `entityLength` covers the whole record including itself. A negative length
//! marks a gap of `abs(length)` bytes; zero is never valid.

use tessera_core::{Endianness, Error, ObjectId, Result, TypeId};

/// Bytes of the record header
pub const HEADER_LENGTH: u64 = 24;

/// Bytes of the length field, and the smallest possible gap
pub const LENGTH_FIELD: u64 = 8;

/// Decoded record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Total record length in bytes
    pub length: u64,
    /// Type id of the record's layout
    pub type_id: TypeId,
    /// Object id of the stored instance
    pub object_id: ObjectId,
}

impl RecordHeader {
    /// Read the header at the start of `bytes`
    ///
    /// Only the header is validated here: the length must be at least a
    /// header long. Gap lengths are rejected; use the scanner for raw files.
    pub fn read(bytes: &[u8], endian: Endianness) -> Result<Self> {
        if (bytes.len() as u64) < HEADER_LENGTH {
            return Err(Error::TruncatedRecord {
                offset: 0,
                needed: HEADER_LENGTH,
                available: bytes.len() as u64,
            });
        }
        let length = endian.read_i64(&bytes[0..8]);
        if length < HEADER_LENGTH as i64 {
            return Err(Error::InvalidEntityLength {
                length,
                channel: 0,
                file_number: 0,
                offset: 0,
            });
        }
        Ok(Self {
            length: length as u64,
            type_id: TypeId::new(endian.read_u64(&bytes[8..16])),
            object_id: ObjectId::new(endian.read_u64(&bytes[16..24])),
        })
    }

    /// Write the header into the first 24 bytes of `buf`
    pub fn write(&self, buf: &mut [u8], endian: Endianness) {
        endian.write_i64(&mut buf[0..8], self.length as i64);
        endian.write_u64(&mut buf[8..16], self.type_id.as_u64());
        endian.write_u64(&mut buf[16..24], self.object_id.as_u64());
    }
}

/// Length field value that turns a record of `length` bytes into a gap
pub fn gap_marker(length: u64, endian: Endianness) -> [u8; 8] {
    let mut marker = [0u8; 8];
    endian.write_i64(&mut marker, -(length as i64));
    marker
}

/// A standalone gap record of `length` bytes (at least [`LENGTH_FIELD`])
pub fn gap_record(length: u64, endian: Endianness) -> Result<Vec<u8>> {
    if length < LENGTH_FIELD {
        return Err(Error::invalid_operation(format!(
            "gap of {} bytes cannot hold its length field",
            length
        )));
    }
    let mut record = vec![0u8; length as usize];
    record[..8].copy_from_slice(&gap_marker(length, endian));
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip_both_orders() {
        for endian in [Endianness::Little, Endianness::Big] {
            let header = RecordHeader {
                length: 40,
                type_id: TypeId::new(1_000_003),
                object_id: ObjectId::new(1_000_000_000_000_000_017),
            };
            let mut buf = [0u8; 24];
            header.write(&mut buf, endian);
            assert_eq!(RecordHeader::read(&buf, endian).unwrap(), header);
        }
    }

    #[test]
    fn test_header_rejects_short_length() {
        let mut buf = [0u8; 24];
        Endianness::Little.write_i64(&mut buf[0..8], 16);
        assert!(matches!(
            RecordHeader::read(&buf, Endianness::Little),
            Err(Error::InvalidEntityLength { length: 16, .. })
        ));
    }

    #[test]
    fn test_header_truncated() {
        assert!(matches!(
            RecordHeader::read(&[0u8; 10], Endianness::Little),
            Err(Error::TruncatedRecord { needed: 24, available: 10, .. })
        ));
    }

    #[test]
    fn test_gap_record() {
        let gap = gap_record(32, Endianness::Big).unwrap();
        assert_eq!(gap.len(), 32);
        assert_eq!(Endianness::Big.read_i64(&gap[..8]), -32);
        assert!(gap_record(4, Endianness::Big).is_err());
    }
}
