//! MaxMind DB (MMDB) format layer
//!
//! - **types**: error type, IP version and record size
//! - **format**: header and metadata parsing
//! - **tree**: search tree traversal for IP lookups and network listing
//!
//! Values are decoded with `crate::data_section::DataDecoder`.

pub mod format;
pub mod tree;
pub mod types;

pub use format::{find_metadata_marker, MmdbHeader, MmdbMetadata};
pub use tree::{LookupResult, Networks, SearchTree};
pub use types::{IpVersion, MmdbError, RecordSize, METADATA_MARKER};
