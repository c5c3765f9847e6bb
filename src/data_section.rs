//! Data section encoding and decoding
//!
//! Implements the MaxMind DB data section type system:
//!
//! - **Pointer**: reference to another item in the data section (resolved
//!   transparently while decoding, emitted for repeated strings while encoding)
//! - **String**, **Bytes**, **Double**, **Float**, **Bool**
//! - **Uint16**, **Uint32**, **Uint64**, **Uint128**, **Int32**
//!   (variable width: the size field carries the byte count)
//! - **Map** (string keys) and **Array**
//!
//! Each item starts with a control byte: type in the top 3 bits, size in the
//! low 5 bits. Type 0 means "extended": the next byte holds `type - 7`, and
//! any size extension bytes follow it.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::mmdb::MmdbError;
use std::collections::HashMap;

/// Nesting limit while decoding (maps, arrays and pointer hops)
const MAX_DECODE_DEPTH: usize = 512;

/// Strings shorter than this are always written inline
const MIN_SHARED_STRING_LEN: usize = 4;

/// Decoded data section value
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Borrow the map, if this is one
    pub fn as_map(&self) -> Option<&HashMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up `key` when this value is a map
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Walk nested maps following `path`
    pub fn get_path(&self, path: &[&str]) -> Option<&DataValue> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }

    /// Borrow the string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned (or non-negative signed) integer widened to u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            DataValue::Int32(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Floating point value (integers are not coerced)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            DataValue::Double(d) => Some(*d),
            DataValue::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Boolean value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Borrow the array, if this is one
    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(a) => Some(a),
            _ => None,
        }
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical top-level values get the same offset, and repeated strings
/// inside values are written once and referenced through pointers.
pub struct DataEncoder {
    /// Encoded data buffer
    buffer: Vec<u8>,
    /// Canonical (pointer-free) encoding -> offset, for value deduplication
    dedup_map: HashMap<Vec<u8>, u32>,
    /// String -> offset of its first encoding
    strings: HashMap<String, u32>,
}

impl DataEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: HashMap::new(),
            strings: HashMap::new(),
        }
    }

    /// Encode a value and return its offset
    ///
    /// If the value was previously encoded, returns the existing offset.
    pub fn encode(&mut self, value: &DataValue) -> u32 {
        let mut canonical = Vec::new();
        write_value(value, &mut canonical, None);

        if let Some(&offset) = self.dedup_map.get(&canonical) {
            return offset;
        }

        let offset = self.buffer.len() as u32;
        let Self {
            buffer, strings, ..
        } = self;
        write_value(value, buffer, Some(strings));
        self.dedup_map.insert(canonical, offset);
        offset
    }

    /// Encode a standalone value without pointers (used for metadata)
    pub fn encode_standalone(value: &DataValue) -> Vec<u8> {
        let mut buffer = Vec::new();
        write_value(value, &mut buffer, None);
        buffer
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get current buffer size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `value` at the end of `buffer`. When `strings` is given, offsets are
/// positions in `buffer` and repeated strings become pointers.
fn write_value(
    value: &DataValue,
    buffer: &mut Vec<u8>,
    mut strings: Option<&mut HashMap<String, u32>>,
) {
    match value {
        DataValue::String(s) => write_string(s, buffer, strings),
        DataValue::Double(d) => {
            write_control(3, 8, buffer);
            buffer.extend_from_slice(&d.to_be_bytes());
        }
        DataValue::Bytes(b) => {
            write_control(4, b.len(), buffer);
            buffer.extend_from_slice(b);
        }
        DataValue::Uint16(n) => write_uint(5, *n as u128, buffer),
        DataValue::Uint32(n) => write_uint(6, *n as u128, buffer),
        DataValue::Map(m) => {
            write_control(7, m.len(), buffer);
            // Sorted keys keep the output deterministic
            let mut pairs: Vec<_> = m.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            for (key, item) in pairs {
                write_string(key, buffer, strings.as_deref_mut());
                write_value(item, buffer, strings.as_deref_mut());
            }
        }
        DataValue::Int32(n) => {
            write_control(8, 4, buffer);
            buffer.extend_from_slice(&n.to_be_bytes());
        }
        DataValue::Uint64(n) => write_uint(9, *n as u128, buffer),
        DataValue::Uint128(n) => write_uint(10, *n, buffer),
        DataValue::Array(items) => {
            write_control(11, items.len(), buffer);
            for item in items {
                write_value(item, buffer, strings.as_deref_mut());
            }
        }
        DataValue::Bool(b) => write_control(14, *b as usize, buffer),
        DataValue::Float(f) => {
            write_control(15, 4, buffer);
            buffer.extend_from_slice(&f.to_be_bytes());
        }
    }
}

fn write_string(s: &str, buffer: &mut Vec<u8>, strings: Option<&mut HashMap<String, u32>>) {
    if let Some(strings) = strings {
        if s.len() >= MIN_SHARED_STRING_LEN {
            if let Some(&target) = strings.get(s) {
                write_pointer(target, buffer);
                return;
            }
            strings.insert(s.to_string(), buffer.len() as u32);
        }
    }
    write_control(2, s.len(), buffer);
    buffer.extend_from_slice(s.as_bytes());
}

/// Unsigned integers are stored big-endian without leading zero bytes
fn write_uint(type_id: u8, n: u128, buffer: &mut Vec<u8>) {
    let bytes = n.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count();
    write_control(type_id, bytes.len() - skip, buffer);
    buffer.extend_from_slice(&bytes[skip..]);
}

fn write_pointer(target: u32, buffer: &mut Vec<u8>) {
    if target < 0x800 {
        buffer.push(0x20 | ((target >> 8) & 0x7) as u8);
        buffer.push(target as u8);
    } else if target < 0x800 + 0x80000 {
        let v = target - 0x800;
        buffer.push(0x20 | (1 << 3) | ((v >> 16) & 0x7) as u8);
        buffer.push((v >> 8) as u8);
        buffer.push(v as u8);
    } else if target < 0x80800 + 0x800_0000 {
        let v = target - 0x80800;
        buffer.push(0x20 | (2 << 3) | ((v >> 24) & 0x7) as u8);
        buffer.push((v >> 16) as u8);
        buffer.push((v >> 8) as u8);
        buffer.push(v as u8);
    } else {
        buffer.push(0x20 | (3 << 3));
        buffer.extend_from_slice(&target.to_be_bytes());
    }
}

/// Control byte(s) for a type and payload size
fn write_control(type_id: u8, size: usize, buffer: &mut Vec<u8>) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 29 + 256 {
        (29, vec![(size - 29) as u8])
    } else if size < 285 + 65536 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65821) as u32).to_be_bytes()[1..].to_vec())
    };

    if type_id <= 7 {
        buffer.push((type_id << 5) | size_bits);
    } else {
        buffer.push(size_bits);
        buffer.push(type_id - 7);
    }
    buffer.extend_from_slice(&extra);
}

/// Data section decoder
///
/// `buffer` starts at the first byte of the data section; pointers are
/// resolved relative to it.
pub struct DataDecoder<'a> {
    buffer: &'a [u8],
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder for a data section
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer }
    }

    /// Decode a value at the given offset
    pub fn decode(&self, offset: u32) -> Result<DataValue, MmdbError> {
        let mut cursor = offset as usize;
        self.decode_at(&mut cursor, 0)
    }

    fn decode_at(&self, cursor: &mut usize, depth: usize) -> Result<DataValue, MmdbError> {
        if depth > MAX_DECODE_DEPTH {
            return Err(decode_err("maximum nesting depth exceeded"));
        }

        let ctrl = self.read_byte(cursor)?;
        let mut type_id = ctrl >> 5;

        if type_id == 1 {
            let target = self.decode_pointer(cursor, ctrl)?;
            let mut target_cursor = target as usize;
            // Pointers never point at other pointers
            if self.peek_type(target_cursor)? == 1 {
                return Err(decode_err("pointer to pointer"));
            }
            return self.decode_at(&mut target_cursor, depth + 1);
        }

        if type_id == 0 {
            type_id = self.read_byte(cursor)?.checked_add(7).ok_or_else(|| {
                decode_err("extended type out of range")
            })?;
        }

        let size = self.decode_size(cursor, ctrl & 0x1F)?;

        match type_id {
            2 => {
                let bytes = self.take(cursor, size)?;
                let s = std::str::from_utf8(bytes).map_err(|_| decode_err("invalid UTF-8"))?;
                Ok(DataValue::String(s.to_string()))
            }
            3 => {
                if size != 8 {
                    return Err(decode_err("double must be 8 bytes"));
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(self.take(cursor, 8)?);
                Ok(DataValue::Double(f64::from_be_bytes(bytes)))
            }
            4 => Ok(DataValue::Bytes(self.take(cursor, size)?.to_vec())),
            5 => Ok(DataValue::Uint16(self.decode_uint(cursor, size, 2)? as u16)),
            6 => Ok(DataValue::Uint32(self.decode_uint(cursor, size, 4)? as u32)),
            7 => {
                let mut map = HashMap::with_capacity(size.min(64));
                for _ in 0..size {
                    let key = match self.decode_at(cursor, depth + 1)? {
                        DataValue::String(s) => s,
                        _ => return Err(decode_err("map key must be a string")),
                    };
                    let value = self.decode_at(cursor, depth + 1)?;
                    map.insert(key, value);
                }
                Ok(DataValue::Map(map))
            }
            8 => {
                if size > 4 {
                    return Err(decode_err("int32 wider than 4 bytes"));
                }
                Ok(DataValue::Int32(self.decode_uint(cursor, size, 4)? as u32 as i32))
            }
            9 => Ok(DataValue::Uint64(self.decode_uint(cursor, size, 8)? as u64)),
            10 => Ok(DataValue::Uint128(self.decode_uint(cursor, size, 16)?)),
            11 => {
                let mut array = Vec::with_capacity(size.min(64));
                for _ in 0..size {
                    array.push(self.decode_at(cursor, depth + 1)?);
                }
                Ok(DataValue::Array(array))
            }
            14 => match size {
                0 => Ok(DataValue::Bool(false)),
                1 => Ok(DataValue::Bool(true)),
                _ => Err(decode_err("bool size must be 0 or 1")),
            },
            15 => {
                if size != 4 {
                    return Err(decode_err("float must be 4 bytes"));
                }
                let mut bytes = [0u8; 4];
                bytes.copy_from_slice(self.take(cursor, 4)?);
                Ok(DataValue::Float(f32::from_be_bytes(bytes)))
            }
            _ => Err(MmdbError::DecodeError(format!(
                "unsupported data type {}",
                type_id
            ))),
        }
    }

    fn decode_pointer(&self, cursor: &mut usize, ctrl: u8) -> Result<u32, MmdbError> {
        let size = (ctrl >> 3) & 0x3;
        let vvv = (ctrl & 0x7) as u32;
        let bytes = self.take(cursor, size as usize + 1)?;
        let tail = bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32);
        Ok(match size {
            0 => (vvv << 8) | tail,
            1 => 0x800 + ((vvv << 16) | tail),
            2 => 0x80800 + ((vvv << 24) | tail),
            _ => tail,
        })
    }

    fn decode_uint(&self, cursor: &mut usize, size: usize, max: usize) -> Result<u128, MmdbError> {
        if size > max {
            return Err(MmdbError::DecodeError(format!(
                "integer of {} bytes exceeds {} byte type",
                size, max
            )));
        }
        let bytes = self.take(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn decode_size(&self, cursor: &mut usize, size_bits: u8) -> Result<usize, MmdbError> {
        Ok(match size_bits {
            0..=28 => size_bits as usize,
            29 => 29 + self.read_byte(cursor)? as usize,
            30 => {
                let b = self.take(cursor, 2)?;
                285 + (((b[0] as usize) << 8) | b[1] as usize)
            }
            _ => {
                let b = self.take(cursor, 3)?;
                65821 + (((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
            }
        })
    }

    fn peek_type(&self, offset: usize) -> Result<u8, MmdbError> {
        self.buffer
            .get(offset)
            .map(|b| b >> 5)
            .ok_or_else(|| decode_err("pointer target out of bounds"))
    }

    fn read_byte(&self, cursor: &mut usize) -> Result<u8, MmdbError> {
        let byte = *self
            .buffer
            .get(*cursor)
            .ok_or_else(|| decode_err("cursor out of bounds"))?;
        *cursor += 1;
        Ok(byte)
    }

    fn take(&self, cursor: &mut usize, len: usize) -> Result<&'a [u8], MmdbError> {
        let end = cursor
            .checked_add(len)
            .filter(|&end| end <= self.buffer.len())
            .ok_or_else(|| decode_err("data truncated"))?;
        let bytes = &self.buffer[*cursor..end];
        *cursor = end;
        Ok(bytes)
    }
}

fn decode_err(msg: &str) -> MmdbError {
    MmdbError::DecodeError(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &DataValue) -> DataValue {
        let mut encoder = DataEncoder::new();
        let offset = encoder.encode(value);
        let bytes = encoder.into_bytes();
        DataDecoder::new(&bytes).decode(offset).unwrap()
    }

    #[test]
    fn test_geo_shaped_record() {
        let mut names = HashMap::new();
        names.insert("en".to_string(), DataValue::String("Australia".to_string()));
        names.insert("de".to_string(), DataValue::String("Australien".to_string()));

        let mut country = HashMap::new();
        country.insert("iso_code".to_string(), DataValue::String("AU".to_string()));
        country.insert("geoname_id".to_string(), DataValue::Uint32(2077456));
        country.insert("names".to_string(), DataValue::Map(names.clone()));

        let mut location = HashMap::new();
        location.insert("latitude".to_string(), DataValue::Double(-33.494));
        location.insert("longitude".to_string(), DataValue::Double(143.2104));
        location.insert("accuracy_radius".to_string(), DataValue::Uint16(1000));

        let mut record = HashMap::new();
        record.insert("country".to_string(), DataValue::Map(country.clone()));
        // Same map twice: the second copy's strings become pointers
        record.insert("registered_country".to_string(), DataValue::Map(country));
        record.insert("location".to_string(), DataValue::Map(location));
        let value = DataValue::Map(record);

        let decoded = roundtrip(&value);
        assert_eq!(decoded, value);
        assert_eq!(
            decoded
                .get_path(&["registered_country", "names", "en"])
                .and_then(DataValue::as_str),
            Some("Australia")
        );
    }

    #[test]
    fn test_repeated_strings_use_pointers() {
        let org = DataValue::String("Cloudflare, Inc.".to_string());
        let value = DataValue::Array(vec![org.clone(), org.clone(), org]);

        let mut encoder = DataEncoder::new();
        encoder.encode(&value);
        let plain = DataEncoder::encode_standalone(&value);
        assert!(encoder.size() < plain.len());
    }

    #[test]
    fn test_variable_width_integers() {
        for value in [
            DataValue::Uint16(0),
            DataValue::Uint16(7),
            DataValue::Uint32(13335),
            DataValue::Uint32(u32::MAX),
            DataValue::Uint64(1 << 40),
            DataValue::Uint128(u128::MAX),
            DataValue::Int32(-42),
        ] {
            assert_eq!(roundtrip(&value), value);
        }
        assert_eq!(DataValue::Uint16(0).as_u64(), Some(0));
        assert_eq!(DataValue::Int32(-1).as_u64(), None);
    }

    #[test]
    fn test_large_strings_and_extended_types() {
        let medium = DataValue::String("x".repeat(100));
        let long = DataValue::String("y".repeat(70_000));
        let array = DataValue::Array(vec![
            DataValue::Bool(true),
            DataValue::Bool(false),
            DataValue::Float(2.5),
            DataValue::Bytes(vec![0xde, 0xad]),
        ]);
        assert_eq!(roundtrip(&medium), medium);
        assert_eq!(roundtrip(&long), long);
        assert_eq!(roundtrip(&array), array);
    }

    #[test]
    fn test_deduplication() {
        let mut encoder = DataEncoder::new();
        let value = DataValue::String("test-value".to_string());
        let offset1 = encoder.encode(&value);
        let offset2 = encoder.encode(&value);
        assert_eq!(offset1, offset2);

        let offset3 = encoder.encode(&DataValue::String("different".to_string()));
        assert_ne!(offset1, offset3);
    }

    #[test]
    fn test_pointer_sizes() {
        // Strings placed beyond each pointer width boundary
        for pad in [10usize, 0x900, 0x80900] {
            // 0xC0 is an empty uint32, a harmless filler
            let mut buffer = vec![0xC0u8; pad];
            let target = buffer.len() as u32;
            write_control(2, 5, &mut buffer);
            buffer.extend_from_slice(b"hello");
            let ptr_at = buffer.len() as u32;
            write_pointer(target, &mut buffer);

            let decoded = DataDecoder::new(&buffer).decode(ptr_at).unwrap();
            assert_eq!(decoded, DataValue::String("hello".to_string()));
        }
    }

    #[test]
    fn test_truncated_data_is_an_error() {
        let bytes = DataEncoder::encode_standalone(&DataValue::String("truncate me".into()));
        let decoder = DataDecoder::new(&bytes[..bytes.len() - 3]);
        assert!(decoder.decode(0).is_err());
        assert!(DataDecoder::new(&[]).decode(0).is_err());
    }

    #[test]
    fn test_pointer_to_pointer_rejected() {
        let mut buffer = Vec::new();
        write_pointer(3, &mut buffer); // offset 0 -> 3
        buffer.push(0);
        write_pointer(0, &mut buffer); // offset 3 -> 0
        assert!(DataDecoder::new(&buffer).decode(0).is_err());
    }
}
