//! Byte order of a dataset
//!
//! The byte order is chosen once when a storage is created and recorded with
//! it; every record in every channel uses the same order.

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte order for all multi-byte values in records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endianness {
    /// Least significant byte first
    #[default]
    Little,
    /// Most significant byte first
    Big,
}

impl Endianness {
    /// Name as used in configuration and metadata files
    pub fn name(&self) -> &'static str {
        match self {
            Endianness::Little => "little",
            Endianness::Big => "big",
        }
    }

    /// Parse a configuration name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "little" => Some(Endianness::Little),
            "big" => Some(Endianness::Big),
            _ => None,
        }
    }

    /// Decode an i64 from the first 8 bytes of `buf`
    #[inline]
    pub fn read_i64(&self, buf: &[u8]) -> i64 {
        match self {
            Endianness::Little => LittleEndian::read_i64(buf),
            Endianness::Big => BigEndian::read_i64(buf),
        }
    }

    /// Decode a u64 from the first 8 bytes of `buf`
    #[inline]
    pub fn read_u64(&self, buf: &[u8]) -> u64 {
        match self {
            Endianness::Little => LittleEndian::read_u64(buf),
            Endianness::Big => BigEndian::read_u64(buf),
        }
    }

    /// Decode an i32
    #[inline]
    pub fn read_i32(&self, buf: &[u8]) -> i32 {
        match self {
            Endianness::Little => LittleEndian::read_i32(buf),
            Endianness::Big => BigEndian::read_i32(buf),
        }
    }

    /// Decode a u32
    #[inline]
    pub fn read_u32(&self, buf: &[u8]) -> u32 {
        match self {
            Endianness::Little => LittleEndian::read_u32(buf),
            Endianness::Big => BigEndian::read_u32(buf),
        }
    }

    /// Decode an i16
    #[inline]
    pub fn read_i16(&self, buf: &[u8]) -> i16 {
        match self {
            Endianness::Little => LittleEndian::read_i16(buf),
            Endianness::Big => BigEndian::read_i16(buf),
        }
    }

    /// Decode an f32
    #[inline]
    pub fn read_f32(&self, buf: &[u8]) -> f32 {
        match self {
            Endianness::Little => LittleEndian::read_f32(buf),
            Endianness::Big => BigEndian::read_f32(buf),
        }
    }

    /// Decode an f64
    #[inline]
    pub fn read_f64(&self, buf: &[u8]) -> f64 {
        match self {
            Endianness::Little => LittleEndian::read_f64(buf),
            Endianness::Big => BigEndian::read_f64(buf),
        }
    }

    /// Encode an i64 into the first 8 bytes of `buf`
    #[inline]
    pub fn write_i64(&self, buf: &mut [u8], value: i64) {
        match self {
            Endianness::Little => LittleEndian::write_i64(buf, value),
            Endianness::Big => BigEndian::write_i64(buf, value),
        }
    }

    /// Encode a u64
    #[inline]
    pub fn write_u64(&self, buf: &mut [u8], value: u64) {
        match self {
            Endianness::Little => LittleEndian::write_u64(buf, value),
            Endianness::Big => BigEndian::write_u64(buf, value),
        }
    }

    /// Encode an i32
    #[inline]
    pub fn write_i32(&self, buf: &mut [u8], value: i32) {
        match self {
            Endianness::Little => LittleEndian::write_i32(buf, value),
            Endianness::Big => BigEndian::write_i32(buf, value),
        }
    }

    /// Encode a u32
    #[inline]
    pub fn write_u32(&self, buf: &mut [u8], value: u32) {
        match self {
            Endianness::Little => LittleEndian::write_u32(buf, value),
            Endianness::Big => BigEndian::write_u32(buf, value),
        }
    }

    /// Encode an i16
    #[inline]
    pub fn write_i16(&self, buf: &mut [u8], value: i16) {
        match self {
            Endianness::Little => LittleEndian::write_i16(buf, value),
            Endianness::Big => BigEndian::write_i16(buf, value),
        }
    }

    /// Encode an f32
    #[inline]
    pub fn write_f32(&self, buf: &mut [u8], value: f32) {
        match self {
            Endianness::Little => LittleEndian::write_f32(buf, value),
            Endianness::Big => BigEndian::write_f32(buf, value),
        }
    }

    /// Encode an f64
    #[inline]
    pub fn write_f64(&self, buf: &mut [u8], value: f64) {
        match self {
            Endianness::Little => LittleEndian::write_f64(buf, value),
            Endianness::Big => BigEndian::write_f64(buf, value),
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_differ_on_the_wire() {
        let mut little = [0u8; 8];
        let mut big = [0u8; 8];
        Endianness::Little.write_i64(&mut little, 1);
        Endianness::Big.write_i64(&mut big, 1);
        assert_eq!(little[0], 1);
        assert_eq!(big[7], 1);
        assert_eq!(Endianness::Little.read_i64(&little), 1);
        assert_eq!(Endianness::Big.read_i64(&big), 1);
    }

    proptest::proptest! {
        #[test]
        fn prop_orders_are_byte_reversed(value in proptest::prelude::any::<i64>()) {
            let mut little = [0u8; 8];
            let mut big = [0u8; 8];
            Endianness::Little.write_i64(&mut little, value);
            Endianness::Big.write_i64(&mut big, value);
            big.reverse();
            proptest::prop_assert_eq!(little, big);
            proptest::prop_assert_eq!(Endianness::Little.read_i64(&little), value);
        }
    }

    #[test]
    fn test_names_round_trip() {
        for order in [Endianness::Little, Endianness::Big] {
            assert_eq!(Endianness::from_name(order.name()), Some(order));
        }
        assert_eq!(Endianness::from_name("middle"), None);
    }

    #[test]
    fn test_serde_lowercase() {
        #[derive(Serialize, Deserialize)]
        struct Holder {
            order: Endianness,
        }
        let parsed: Holder = toml::from_str("order = \"big\"").unwrap();
        assert_eq!(parsed.order, Endianness::Big);
    }
}
