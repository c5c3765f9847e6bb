//! MMDB-specific Type Definitions
//!
//! Data values use the `DataValue` type from the `data_section` module,
//! which implements the MMDB data section encoding.

use thiserror::Error;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Size of the all-zero separator between search tree and data section
pub const DATA_SECTION_SEPARATOR_SIZE: usize = 16;

/// MMDB-specific error types
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MmdbError {
    /// Invalid file format
    #[error("Invalid MMDB format: {0}")]
    InvalidFormat(String),
    /// Metadata not found
    #[error("MMDB metadata marker not found")]
    MetadataNotFound,
    /// Invalid metadata structure
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),
    /// Data decoding error
    #[error("Data decode error: {0}")]
    DecodeError(String),
}

impl From<String> for MmdbError {
    fn from(msg: String) -> Self {
        MmdbError::DecodeError(msg)
    }
}

/// IP version of a search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (IPv4 addresses live under ::/96)
    V6,
}

impl IpVersion {
    /// Bit depth of the tree for this version
    pub fn bit_count(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Numeric form used in the metadata map
    pub fn as_number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Largest record value this width can hold
    pub fn max_value(self) -> u64 {
        match self {
            RecordSize::Bits24 => (1 << 24) - 1,
            RecordSize::Bits28 => (1 << 28) - 1,
            RecordSize::Bits32 => u32::MAX as u64,
        }
    }

    /// Number of bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from bit size
    pub fn from_bits(bits: u16) -> Result<Self, MmdbError> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(MmdbError::InvalidFormat(format!(
                "Invalid record size: {} bits",
                bits
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size_from_bits() {
        assert_eq!(RecordSize::from_bits(24).unwrap(), RecordSize::Bits24);
        assert_eq!(RecordSize::from_bits(28).unwrap().node_bytes(), 7);
        assert!(RecordSize::from_bits(30).is_err());
    }

    #[test]
    fn test_record_size_capacity() {
        assert_eq!(RecordSize::Bits24.max_value(), 0xFF_FFFF);
        assert_eq!(RecordSize::Bits28.max_value(), 0x0FFF_FFFF);
        assert_eq!(RecordSize::Bits32.bits(), 32);
    }
}
