//! MMDB Binary Format Parsing
//!
//! A database file is laid out as:
//!
//! ```text
//! [search tree][16 zero bytes][data section]["\xAB\xCD\xEFMaxMind.com"][metadata]
//! ```
//!
//! Only the header fields needed for traversal are kept in `MmdbHeader`
//! (a small `Copy` struct); the descriptive fields land in `MmdbMetadata`,
//! decoded once when a source is opened.

use super::types::{IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use crate::data_section::{DataDecoder, DataValue};
use std::collections::HashMap;

/// Window at the end of the file searched for the metadata marker
const METADATA_SEARCH_SIZE: usize = 128 * 1024;

/// Layout information needed for IP lookups
#[derive(Debug, Clone, Copy)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: usize,
    /// Offset of the first data section byte
    pub data_section_start: usize,
    /// Offset of the metadata marker (end of the data section)
    pub data_section_end: usize,
}

impl MmdbHeader {
    /// Parse the header from a complete database image
    pub fn from_file(data: &[u8]) -> Result<Self, MmdbError> {
        let marker_offset = find_metadata_marker(data)?;
        let metadata = decode_metadata_map(data, marker_offset)?;

        if let Some(major) = metadata.get("binary_format_major_version") {
            if major.as_u64() != Some(2) {
                return Err(MmdbError::InvalidMetadata(format!(
                    "unsupported binary format version {:?}",
                    major
                )));
            }
        }

        let node_count = extract_uint(&metadata, "node_count")?;
        let record_bits = extract_uint(&metadata, "record_size")?;
        let record_size = RecordSize::from_bits(u16::try_from(record_bits).unwrap_or(0))?;

        let ip_version = match extract_uint(&metadata, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(MmdbError::InvalidMetadata(format!(
                    "Invalid IP version: {}",
                    other
                )))
            }
        };

        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::InvalidMetadata(format!("node_count {} out of range", node_count))
        })?;
        let tree_size = node_count as usize * record_size.node_bytes();
        let data_section_start = tree_size + DATA_SECTION_SEPARATOR_SIZE;

        if data_section_start > marker_offset {
            return Err(MmdbError::InvalidFormat(format!(
                "search tree ({} bytes) exceeds file body ({} bytes)",
                tree_size, marker_offset
            )));
        }

        Ok(MmdbHeader {
            node_count,
            record_size,
            ip_version,
            tree_size,
            data_section_start,
            data_section_end: marker_offset,
        })
    }
}

/// Descriptive metadata of a database file
#[derive(Debug, Clone, PartialEq)]
pub struct MmdbMetadata {
    /// Edition name, e.g. `GeoLite2-City`
    pub database_type: String,
    /// Build time, seconds since the Unix epoch
    pub build_epoch: u64,
    /// Locales present in the data
    pub languages: Vec<String>,
    /// Description keyed by language
    pub description: HashMap<String, String>,
    /// `binary_format_major_version`.`binary_format_minor_version`
    pub binary_format: (u16, u16),
}

impl MmdbMetadata {
    /// Decode the metadata map of a database image
    pub fn from_file(data: &[u8]) -> Result<Self, MmdbError> {
        let marker_offset = find_metadata_marker(data)?;
        let map = decode_metadata_map(data, marker_offset)?;
        Ok(Self::from_map(&map))
    }

    fn from_map(map: &HashMap<String, DataValue>) -> Self {
        let string = |key: &str| {
            map.get(key)
                .and_then(DataValue::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let uint = |key: &str| map.get(key).and_then(DataValue::as_u64).unwrap_or(0);

        let languages = map
            .get("languages")
            .and_then(DataValue::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let description = map
            .get("description")
            .and_then(DataValue::as_map)
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        MmdbMetadata {
            database_type: string("database_type"),
            build_epoch: uint("build_epoch"),
            languages,
            description,
            binary_format: (
                uint("binary_format_major_version") as u16,
                uint("binary_format_minor_version") as u16,
            ),
        }
    }
}

/// Find the metadata marker, returning the offset of its LAST occurrence
/// within the final 128KB of the file
pub fn find_metadata_marker(data: &[u8]) -> Result<usize, MmdbError> {
    if data.len() < METADATA_MARKER.len() {
        return Err(MmdbError::MetadataNotFound);
    }

    let search_start = data.len().saturating_sub(METADATA_SEARCH_SIZE);
    data[search_start..]
        .windows(METADATA_MARKER.len())
        .rposition(|window| window == METADATA_MARKER)
        .map(|pos| search_start + pos)
        .ok_or(MmdbError::MetadataNotFound)
}

fn decode_metadata_map(
    data: &[u8],
    marker_offset: usize,
) -> Result<HashMap<String, DataValue>, MmdbError> {
    let metadata_bytes = &data[marker_offset + METADATA_MARKER.len()..];
    match DataDecoder::new(metadata_bytes).decode(0) {
        Ok(DataValue::Map(map)) => Ok(map),
        Ok(_) => Err(MmdbError::InvalidMetadata(
            "Metadata is not a map".to_string(),
        )),
        Err(e) => Err(MmdbError::InvalidMetadata(format!(
            "Failed to decode metadata: {}",
            e
        ))),
    }
}

fn extract_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<u64, MmdbError> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            MmdbError::InvalidMetadata(format!("Field '{}' is not an unsigned integer", key))
        }),
        None => Err(MmdbError::InvalidMetadata(format!(
            "Required field '{}' not found",
            key
        ))),
    }
}
