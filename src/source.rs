//! A single opened database edition
//!
//! A `GeoSource` owns one database image, either memory mapped or read
//! fully into memory, with its header validated at open time. After open
//! it is read-only, so lookups never touch the filesystem.

use crate::data_section::{DataDecoder, DataValue};
use crate::error::SourceError;
use crate::mmdb::{MmdbError, MmdbHeader, MmdbMetadata, SearchTree};
use ipnet::IpNet;
use memmap2::Mmap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::warn;

/// One of the three database editions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Edition {
    /// Country-level geolocation
    Country,
    /// City-level geolocation (includes country fields)
    City,
    /// Autonomous system number and organization
    Asn,
}

impl Edition {
    /// All editions, in load order
    pub const ALL: [Edition; 3] = [Edition::Country, Edition::City, Edition::Asn];

    /// Default file name inside the data directory
    pub fn default_file_name(self) -> &'static str {
        match self {
            Edition::Country => "GeoLite2-Country.mmdb",
            Edition::City => "GeoLite2-City.mmdb",
            Edition::Asn => "GeoLite2-ASN.mmdb",
        }
    }

    /// Short lowercase name
    pub fn name(self) -> &'static str {
        match self {
            Edition::Country => "country",
            Edition::City => "city",
            Edition::Asn => "asn",
        }
    }

    /// Marker expected somewhere in the `database_type` metadata
    fn type_marker(self) -> &'static str {
        match self {
            Edition::Country => "Country",
            Edition::City => "City",
            Edition::Asn => "ASN",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How database files are brought into memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Memory map the file
    ///
    /// Updaters must replace files by rename. Truncating or rewriting a
    /// mapped file in place can raise SIGBUS or hand readers torn records.
    #[default]
    Mmap,
    /// Read the whole file into an owned buffer
    Memory,
}

/// Size, modification time and (on Unix) inode of a file when it was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    len: u64,
    modified: Option<SystemTime>,
    inode: Option<u64>,
}

impl FileFingerprint {
    /// Fingerprint of the file at `path`
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        Ok(Self {
            len: meta.len(),
            modified: meta.modified().ok(),
            inode: inode(&meta),
        })
    }
}

// A rename always lands a new inode, even within one mtime tick
#[cfg(unix)]
fn inode(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn inode(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}

enum SourceStorage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl SourceStorage {
    fn as_slice(&self) -> &[u8] {
        match self {
            SourceStorage::Owned(v) => v.as_slice(),
            SourceStorage::Mmap(m) => &m[..],
        }
    }
}

/// An opened, validated database file
pub struct GeoSource {
    edition: Edition,
    path: Option<PathBuf>,
    storage: SourceStorage,
    header: MmdbHeader,
    metadata: MmdbMetadata,
    ipv4_start: (u32, u8),
    fingerprint: Option<FileFingerprint>,
}

impl GeoSource {
    /// Open and validate the database file at `path`
    pub fn open(edition: Edition, path: &Path, mode: LoadMode) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        };

        let fingerprint = FileFingerprint::of(path).map_err(io_err)?;
        let storage = match mode {
            LoadMode::Mmap => {
                let file = File::open(path).map_err(io_err)?;
                // SAFETY: the mapping is read-only; files are replaced by
                // rename, and `LoadMode::Memory` covers in-place rewrites
                let mmap = unsafe { Mmap::map(&file) }.map_err(io_err)?;
                SourceStorage::Mmap(mmap)
            }
            LoadMode::Memory => SourceStorage::Owned(std::fs::read(path).map_err(io_err)?),
        };

        let mut source =
            Self::from_storage(edition, storage).map_err(|source| SourceError::Format {
                path: path.to_path_buf(),
                source,
            })?;
        source.path = Some(path.to_path_buf());
        source.fingerprint = Some(fingerprint);

        if !source.metadata.database_type.contains(edition.type_marker()) {
            warn!(
                edition = %edition,
                path = %path.display(),
                database_type = %source.metadata.database_type,
                "database type does not match edition"
            );
        }
        Ok(source)
    }

    /// Build a source from an in-memory database image
    pub fn from_bytes(edition: Edition, data: Vec<u8>) -> Result<Self, MmdbError> {
        Self::from_storage(edition, SourceStorage::Owned(data))
    }

    fn from_storage(edition: Edition, storage: SourceStorage) -> Result<Self, MmdbError> {
        let data = storage.as_slice();
        let header = MmdbHeader::from_file(data)?;
        let metadata = MmdbMetadata::from_file(data)?;
        // Walking to the IPv4 subtree touches the top of the tree, which
        // catches truncated trees before the source is published
        let ipv4_start = SearchTree::new(data, &header).ipv4_start_node()?;

        Ok(Self {
            edition,
            path: None,
            storage,
            header,
            metadata,
            ipv4_start,
            fingerprint: None,
        })
    }

    /// Look up `ip`, returning the decoded record and the matched prefix length
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<(DataValue, u8)>, MmdbError> {
        let data = self.storage.as_slice();
        let tree = SearchTree::new(data, &self.header).with_ipv4_start(self.ipv4_start);
        let Some(found) = tree.lookup(ip)? else {
            return Ok(None);
        };

        let section = &data[self.header.data_section_start..self.header.data_section_end];
        let value = DataDecoder::new(section).decode(found.data_offset)?;
        Ok(Some((value, found.prefix_len)))
    }

    /// Every network in the database with its decoded record, in address order
    ///
    /// IPv4 networks of an IPv6 database are reported as IPv4. Iteration
    /// ends after the first error.
    pub fn networks(
        &self,
    ) -> impl Iterator<Item = Result<(IpNet, DataValue), MmdbError>> + '_ {
        let data = self.storage.as_slice();
        let section = &data[self.header.data_section_start..self.header.data_section_end];
        let decoder = DataDecoder::new(section);
        SearchTree::new(data, &self.header)
            .with_ipv4_start(self.ipv4_start)
            .networks()
            .map(move |found| -> Result<(IpNet, DataValue), MmdbError> {
                let (network, offset) = found?;
                Ok((network, decoder.decode(offset)?))
            })
    }

    /// Edition this source was opened as
    pub fn edition(&self) -> Edition {
        self.edition
    }

    /// File the source was opened from (`None` for in-memory sources)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `database_type` from the metadata
    pub fn database_type(&self) -> &str {
        &self.metadata.database_type
    }

    /// Build time from the metadata, seconds since the Unix epoch
    pub fn build_epoch(&self) -> u64 {
        self.metadata.build_epoch
    }

    /// Decoded metadata
    pub fn metadata(&self) -> &MmdbMetadata {
        &self.metadata
    }

    /// Tree layout
    pub fn header(&self) -> &MmdbHeader {
        &self.header
    }

    /// Size of the database image in bytes
    pub fn size(&self) -> usize {
        self.storage.as_slice().len()
    }

    /// True when the file at `path` still matches the fingerprint taken at open
    pub fn is_unchanged(&self, path: &Path) -> bool {
        match (&self.path, self.fingerprint) {
            (Some(own), Some(fingerprint)) if own == path => {
                FileFingerprint::of(path).ok() == Some(fingerprint)
            }
            _ => false,
        }
    }
}

impl fmt::Debug for GeoSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeoSource")
            .field("edition", &self.edition)
            .field("path", &self.path)
            .field("database_type", &self.metadata.database_type)
            .field("node_count", &self.header.node_count)
            .finish()
    }
}
