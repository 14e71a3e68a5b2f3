//! Entity scanner
//!
//! Walks the raw bytes of a data file record by record using only the length
//! field. Negative lengths are gaps and are skipped by `abs(length)` bytes.
//! A zero length would never advance and aborts the scan, as does any length
//! too small to hold its own header.

use crate::record::{RecordHeader, HEADER_LENGTH, LENGTH_FIELD};
use tessera_core::{Endianness, Error, Result};
use tracing::trace;

/// One entry found while scanning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEntry {
    /// A live or superseded record
    Entity {
        /// Position of the record in the file
        offset: u64,
        /// Its header
        header: RecordHeader,
    },
    /// A gap of skippable bytes
    Gap {
        /// Position of the gap in the file
        offset: u64,
        /// Gap length in bytes
        length: u64,
    },
}

impl ScanEntry {
    /// Position of the entry
    pub fn offset(&self) -> u64 {
        match self {
            ScanEntry::Entity { offset, .. } | ScanEntry::Gap { offset, .. } => *offset,
        }
    }

    /// Bytes covered by the entry
    pub fn length(&self) -> u64 {
        match self {
            ScanEntry::Entity { header, .. } => header.length,
            ScanEntry::Gap { length, .. } => *length,
        }
    }
}

/// Iterator over the entries of one data file's bytes
///
/// Yields `Err` once and then stops.
pub struct EntityScanner<'a> {
    bytes: &'a [u8],
    pos: usize,
    endian: Endianness,
    channel: usize,
    file_number: u64,
    failed: bool,
}

impl<'a> EntityScanner<'a> {
    /// Scanner over `bytes`; channel and file number only label errors
    pub fn new(bytes: &'a [u8], endian: Endianness, channel: usize, file_number: u64) -> Self {
        Self {
            bytes,
            pos: 0,
            endian,
            channel,
            file_number,
            failed: false,
        }
    }

    /// Offset of the next entry
    pub fn position(&self) -> u64 {
        self.pos as u64
    }

    fn invalid(&self, length: i64) -> Error {
        Error::InvalidEntityLength {
            length,
            channel: self.channel,
            file_number: self.file_number,
            offset: self.pos as u64,
        }
    }

    fn truncated(&self, needed: u64) -> Error {
        Error::TruncatedRecord {
            offset: self.pos as u64,
            needed,
            available: (self.bytes.len() - self.pos) as u64,
        }
    }

    fn next_entry(&mut self) -> Result<ScanEntry> {
        let rest = &self.bytes[self.pos..];
        if (rest.len() as u64) < LENGTH_FIELD {
            return Err(self.truncated(LENGTH_FIELD));
        }
        let length = self.endian.read_i64(&rest[..8]);
        let offset = self.pos as u64;

        let entry = if length < 0 {
            let gap = length.unsigned_abs();
            if gap < LENGTH_FIELD {
                return Err(self.invalid(length));
            }
            if gap > rest.len() as u64 {
                return Err(self.truncated(gap));
            }
            ScanEntry::Gap {
                offset,
                length: gap,
            }
        } else {
            if (length as u64) < HEADER_LENGTH {
                return Err(self.invalid(length));
            }
            if length as u64 > rest.len() as u64 {
                return Err(self.truncated(length as u64));
            }
            let header = RecordHeader::read(rest, self.endian)?;
            ScanEntry::Entity { offset, header }
        };
        self.pos += entry.length() as usize;
        Ok(entry)
    }
}

impl<'a> Iterator for EntityScanner<'a> {
    type Item = Result<ScanEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.bytes.len() {
            return None;
        }
        let result = self.next_entry();
        match &result {
            Ok(entry) => trace!(
                target: "tessera::storage",
                channel = self.channel,
                file_number = self.file_number,
                offset = entry.offset(),
                length = entry.length(),
                gap = matches!(entry, ScanEntry::Gap { .. }),
                "Scanned entry"
            ),
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::gap_record;
    use tessera_core::{ObjectId, TypeId};

    fn record(length: u64, object_id: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; length as usize];
        RecordHeader {
            length,
            type_id: TypeId::new(1_000_000),
            object_id: ObjectId::new(object_id),
        }
        .write(&mut bytes, Endianness::Little);
        bytes
    }

    #[test]
    fn test_gap_then_record() {
        let mut bytes = gap_record(40, Endianness::Little).unwrap();
        bytes.extend(record(32, 7));
        let entries: Vec<ScanEntry> = EntityScanner::new(&bytes, Endianness::Little, 0, 1)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ScanEntry::Gap { offset: 0, length: 40 });
        match entries[1] {
            ScanEntry::Entity { offset, header } => {
                assert_eq!(offset, 40);
                assert_eq!(header.object_id, ObjectId::new(7));
            }
            other => panic!("expected entity, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_length_aborts() {
        let mut bytes = record(32, 7);
        bytes.extend_from_slice(&[0u8; 24]);
        let mut scanner = EntityScanner::new(&bytes, Endianness::Little, 3, 9);
        assert!(scanner.next().unwrap().is_ok());
        assert!(matches!(
            scanner.next(),
            Some(Err(Error::InvalidEntityLength { length: 0, channel: 3, file_number: 9, offset: 32 }))
        ));
        assert!(scanner.next().is_none());
    }

    #[test]
    fn test_truncated_tail() {
        let mut bytes = record(32, 7);
        bytes.truncate(30);
        let result: Result<Vec<ScanEntry>> =
            EntityScanner::new(&bytes, Endianness::Little, 0, 1).collect();
        assert!(matches!(result, Err(Error::TruncatedRecord { offset: 0, needed: 32, .. })));
    }

    #[test]
    fn test_tiny_gap_rejected() {
        let mut bytes = vec![0u8; 8];
        Endianness::Little.write_i64(&mut bytes, -4);
        let result: Result<Vec<ScanEntry>> =
            EntityScanner::new(&bytes, Endianness::Little, 0, 1).collect();
        assert!(matches!(result, Err(Error::InvalidEntityLength { length: -4, .. })));
    }

    #[test]
    fn test_empty_file() {
        assert_eq!(EntityScanner::new(&[], Endianness::Big, 0, 1).count(), 0);
    }
}
