//! MMDB Database Builder
//!
//! Writes MaxMind DB files from `(network, value)` entries. Used by the
//! `build` command to produce edition files, and by tests to generate
//! fixture databases.
//!
//! ```
//! use geoscope::builder::GeoDatabaseBuilder;
//! use geoscope::DataValue;
//! use std::collections::HashMap;
//!
//! let mut asn = HashMap::new();
//! asn.insert("autonomous_system_number".to_string(), DataValue::Uint32(13335));
//!
//! let mut builder = GeoDatabaseBuilder::new("GeoLite2-ASN");
//! builder.add_network("1.1.1.0/24", DataValue::Map(asn)).unwrap();
//! let bytes = builder.build().unwrap();
//! assert!(!bytes.is_empty());
//! ```

use crate::data_section::{DataEncoder, DataValue};
use crate::error::BuildError;
use crate::ip_tree_builder::IpTreeBuilder;
use crate::mmdb::types::{IpVersion, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER};
use ipnet::IpNet;
use std::collections::HashMap;
use std::net::IpAddr;

/// Database builder
pub struct GeoDatabaseBuilder {
    entries: Vec<(IpNet, DataValue)>,
    database_type: String,
    description: HashMap<String, String>,
    languages: Vec<String>,
    build_epoch: Option<u64>,
}

impl GeoDatabaseBuilder {
    /// Create a builder for a database of the given type (e.g. `GeoLite2-City`)
    pub fn new(database_type: impl Into<String>) -> Self {
        Self {
            entries: Vec::new(),
            database_type: database_type.into(),
            description: HashMap::new(),
            languages: vec!["en".to_string()],
            build_epoch: None,
        }
    }

    /// Add a description in a specific language
    pub fn with_description(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Set the locales advertised in the metadata
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Pin the build time instead of using the current time
    pub fn with_build_epoch(mut self, epoch: u64) -> Self {
        self.build_epoch = Some(epoch);
        self
    }

    /// Add an entry keyed by a CIDR block or a single address
    pub fn add_network(&mut self, key: &str, data: DataValue) -> Result<(), BuildError> {
        let network = parse_network(key)?;
        self.add_net(network, data);
        Ok(())
    }

    /// Add an entry for an already parsed network (host bits are cleared)
    pub fn add_net(&mut self, network: IpNet, data: DataValue) {
        self.entries.push((network.trunc(), data));
    }

    /// Number of entries added
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries were added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the database image
    pub fn build(&self) -> Result<Vec<u8>, BuildError> {
        let mut encoder = DataEncoder::new();
        let offsets: Vec<u32> = self
            .entries
            .iter()
            .map(|(_, data)| encoder.encode(data))
            .collect();
        let data_section = encoder.into_bytes();

        let ip_version = if self.entries.iter().any(|(net, _)| matches!(net, IpNet::V6(_))) {
            IpVersion::V6
        } else {
            IpVersion::V4
        };

        let mut tree = IpTreeBuilder::new(ip_version);
        for ((network, _), offset) in self.entries.iter().zip(offsets) {
            tree.insert(network, offset)?;
        }
        let (tree_bytes, node_count, record_size) = tree.build(data_section.len())?;

        let metadata = self.metadata(ip_version, node_count, record_size.bits());

        let mut database = Vec::with_capacity(
            tree_bytes.len() + DATA_SECTION_SEPARATOR_SIZE + data_section.len() + 512,
        );
        database.extend_from_slice(&tree_bytes);
        database.extend_from_slice(&[0u8; DATA_SECTION_SEPARATOR_SIZE]);
        database.extend_from_slice(&data_section);
        database.extend_from_slice(METADATA_MARKER);
        database.extend_from_slice(&DataEncoder::encode_standalone(&metadata));
        Ok(database)
    }

    fn metadata(&self, ip_version: IpVersion, node_count: u32, record_bits: u16) -> DataValue {
        let build_epoch = self
            .build_epoch
            .unwrap_or_else(|| chrono::Utc::now().timestamp().max(0) as u64);

        let description = self
            .description
            .iter()
            .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
            .collect();

        let mut metadata = HashMap::new();
        metadata.insert("binary_format_major_version".to_string(), DataValue::Uint16(2));
        metadata.insert("binary_format_minor_version".to_string(), DataValue::Uint16(0));
        metadata.insert("build_epoch".to_string(), DataValue::Uint64(build_epoch));
        metadata.insert(
            "database_type".to_string(),
            DataValue::String(self.database_type.clone()),
        );
        metadata.insert("description".to_string(), DataValue::Map(description));
        metadata.insert(
            "languages".to_string(),
            DataValue::Array(
                self.languages
                    .iter()
                    .map(|l| DataValue::String(l.clone()))
                    .collect(),
            ),
        );
        metadata.insert(
            "ip_version".to_string(),
            DataValue::Uint16(ip_version.as_number()),
        );
        metadata.insert("node_count".to_string(), DataValue::Uint32(node_count));
        metadata.insert("record_size".to_string(), DataValue::Uint16(record_bits));
        DataValue::Map(metadata)
    }
}

/// Parse `a.b.c.d/n`, `x::/n`, or a bare address (host network)
fn parse_network(key: &str) -> Result<IpNet, BuildError> {
    let key = key.trim();
    if let Ok(addr) = key.parse::<IpAddr>() {
        return Ok(IpNet::from(addr));
    }
    key.parse::<IpNet>()
        .map_err(|_| BuildError::InvalidNetwork(key.to_string()))
}
