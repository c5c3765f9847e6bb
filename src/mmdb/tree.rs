//! MMDB Search Tree Traversal
//!
//! Each node holds two records (left for a 0 bit, right for a 1 bit). A
//! record value is either:
//! - `< node_count`: index of the next node
//! - `== node_count`: no data for this address
//! - `> node_count`: pointer into the data section
//!
//! IPv6 trees store IPv4 networks under `::/96`, so IPv4 lookups start at
//! the node reached by following 96 zero bits.

use super::format::MmdbHeader;
use super::types::{IpVersion, MmdbError, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Result of an IP lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start)
    pub data_offset: u32,
    /// Prefix length of the matched network, in the address family of the query
    pub prefix_len: u8,
}

/// Search tree for IP address lookups
#[derive(Clone, Copy)]
pub struct SearchTree<'a> {
    data: &'a [u8],
    header: &'a MmdbHeader,
    ipv4_start: Option<(u32, u8)>,
}

impl<'a> SearchTree<'a> {
    /// Create a new search tree over a complete database image
    pub fn new(data: &'a [u8], header: &'a MmdbHeader) -> Self {
        Self {
            data,
            header,
            ipv4_start: None,
        }
    }

    /// Reuse a previously computed IPv4 start node
    pub fn with_ipv4_start(mut self, start: (u32, u8)) -> Self {
        self.ipv4_start = Some(start);
        self
    }

    /// Look up an IP address
    ///
    /// IPv4-mapped IPv6 addresses are looked up as their IPv4 form. Other
    /// IPv6 addresses never match in an IPv4-only tree.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>, MmdbError> {
        match ip {
            IpAddr::V4(addr) => self.lookup_v4(addr),
            IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
                Some(v4) => self.lookup_v4(v4),
                None => self.lookup_v6(addr),
            },
        }
    }

    /// Look up an IPv4 address
    pub fn lookup_v4(&self, addr: Ipv4Addr) -> Result<Option<LookupResult>, MmdbError> {
        let (node, depth) = match self.ipv4_start {
            Some(start) => start,
            None => self.ipv4_start_node()?,
        };
        let found = self.traverse(u32::from(addr) as u128, 32, node, depth)?;
        Ok(found.map(|(data_offset, depth)| LookupResult {
            data_offset,
            prefix_len: depth.saturating_sub(self.ipv4_depth_offset()),
        }))
    }

    /// Look up an IPv6 address
    pub fn lookup_v6(&self, addr: Ipv6Addr) -> Result<Option<LookupResult>, MmdbError> {
        if self.header.ip_version == IpVersion::V4 {
            return Ok(None);
        }
        let found = self.traverse(u128::from(addr), 128, 0, 0)?;
        Ok(found.map(|(data_offset, prefix_len)| LookupResult {
            data_offset,
            prefix_len,
        }))
    }

    /// Record reached by following 96 zero bits, and the depth reached
    ///
    /// For IPv4 trees this is the root. The returned record may already be
    /// terminal when the tree has a `::/n` entry with `n <= 96`.
    pub fn ipv4_start_node(&self) -> Result<(u32, u8), MmdbError> {
        if self.header.ip_version == IpVersion::V4 {
            return Ok((0, 0));
        }
        let mut node = 0u32;
        let mut depth = 0u8;
        while depth < 96 && node < self.header.node_count {
            node = self.read_record(node, 0)?;
            depth += 1;
        }
        Ok((node, depth))
    }

    /// Every network in the tree that carries data, with its data offset
    pub fn networks(&self) -> Networks<'a> {
        let ipv4_node = match self.header.ip_version {
            IpVersion::V4 => None,
            IpVersion::V6 => self
                .ipv4_start
                .or_else(|| self.ipv4_start_node().ok())
                .filter(|&(node, depth)| depth == 96 && node < self.header.node_count)
                .map(|(node, _)| node),
        };
        Networks {
            tree: *self,
            stack: vec![Frame {
                record: 0,
                bits: 0,
                depth: 0,
            }],
            ipv4_node,
        }
    }

    fn ipv4_depth_offset(&self) -> u8 {
        match self.header.ip_version {
            IpVersion::V4 => 0,
            IpVersion::V6 => 96,
        }
    }

    /// Walk `bit_count` bits of `bits` from `node`, returning the data
    /// offset and the tree depth of the terminating record
    fn traverse(
        &self,
        bits: u128,
        bit_count: u8,
        mut node: u32,
        mut depth: u8,
    ) -> Result<Option<(u32, u8)>, MmdbError> {
        let node_count = self.header.node_count;
        let mut consumed = 0u8;

        loop {
            if node == node_count {
                return Ok(None);
            }
            if node > node_count {
                return Ok(Some((self.calculate_data_offset(node)?, depth)));
            }
            if consumed == bit_count {
                return Err(MmdbError::InvalidFormat(format!(
                    "search tree deeper than {} bits",
                    bit_count
                )));
            }
            let bit = ((bits >> (bit_count - 1 - consumed)) & 1) as u8;
            node = self.read_record(node, bit)?;
            consumed += 1;
            depth += 1;
        }
    }

    /// Read the left (`side == 0`) or right record of a node
    fn read_record(&self, node: u32, side: u8) -> Result<u32, MmdbError> {
        if node >= self.header.node_count {
            return Err(MmdbError::InvalidFormat(format!(
                "Node index {} exceeds node count {}",
                node, self.header.node_count
            )));
        }

        let node_bytes = self.header.record_size.node_bytes();
        let offset = node as usize * node_bytes;
        let bytes = self
            .data
            .get(offset..offset + node_bytes)
            .filter(|_| offset + node_bytes <= self.header.tree_size)
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!(
                    "Node offset {} exceeds tree size {}",
                    offset, self.header.tree_size
                ))
            })?;

        Ok(match self.header.record_size {
            RecordSize::Bits24 => {
                let b = if side == 0 { &bytes[0..3] } else { &bytes[3..6] };
                be_uint(b)
            }
            // [left 24 bits][left high nibble | right high nibble][right 24 bits]
            RecordSize::Bits28 => {
                if side == 0 {
                    (((bytes[3] >> 4) as u32) << 24) | be_uint(&bytes[0..3])
                } else {
                    (((bytes[3] & 0x0F) as u32) << 24) | be_uint(&bytes[4..7])
                }
            }
            RecordSize::Bits32 => {
                let b = if side == 0 { &bytes[0..4] } else { &bytes[4..8] };
                be_uint(b)
            }
        })
    }

    /// Data section offset for a data record: `record - node_count - 16`
    fn calculate_data_offset(&self, record: u32) -> Result<u32, MmdbError> {
        let offset = (record - self.header.node_count)
            .checked_sub(DATA_SECTION_SEPARATOR_SIZE as u32)
            .ok_or_else(|| {
                MmdbError::InvalidFormat(format!(
                    "record {} points into the data section separator",
                    record
                ))
            })?;

        let data_len = self.header.data_section_end - self.header.data_section_start;
        if offset as usize >= data_len {
            return Err(MmdbError::InvalidFormat(format!(
                "data offset {} beyond data section ({} bytes)",
                offset, data_len
            )));
        }
        Ok(offset)
    }
}

/// Depth-first walk over the networks of a [`SearchTree`]
///
/// Networks come out in ascending address order. In IPv6 trees the
/// `::/96` subtree is reported as IPv4 networks, and records elsewhere that
/// point back into it (MaxMind's `::ffff:0:0/96` and `2002::/16` aliases)
/// are skipped so each IPv4 network is reported once. The walk stops after
/// the first error.
pub struct Networks<'a> {
    tree: SearchTree<'a>,
    stack: Vec<Frame>,
    ipv4_node: Option<u32>,
}

#[derive(Clone, Copy)]
struct Frame {
    record: u32,
    bits: u128,
    depth: u8,
}

impl Networks<'_> {
    fn network(&self, frame: Frame) -> Result<IpNet, MmdbError> {
        let v4 = |len| Ipv4Net::new(Ipv4Addr::from(frame.bits as u32), len).map(IpNet::V4);
        let network = match self.tree.header.ip_version {
            IpVersion::V4 => v4(frame.depth),
            IpVersion::V6 if frame.depth >= 96 && frame.bits >> 32 == 0 => v4(frame.depth - 96),
            IpVersion::V6 => Ipv6Net::new(Ipv6Addr::from(frame.bits), frame.depth).map(IpNet::V6),
        };
        network.map_err(|_| {
            MmdbError::InvalidFormat(format!("prefix length {} out of range", frame.depth))
        })
    }

    fn fail(&mut self, err: MmdbError) -> Option<Result<(IpNet, u32), MmdbError>> {
        self.stack.clear();
        Some(Err(err))
    }
}

impl Iterator for Networks<'_> {
    type Item = Result<(IpNet, u32), MmdbError>;

    fn next(&mut self) -> Option<Self::Item> {
        let node_count = self.tree.header.node_count;
        let bit_count = self.tree.header.ip_version.bit_count();

        while let Some(frame) = self.stack.pop() {
            if frame.record == node_count {
                continue;
            }
            if frame.record > node_count {
                let found = self
                    .tree
                    .calculate_data_offset(frame.record)
                    .and_then(|offset| Ok((self.network(frame)?, offset)));
                return match found {
                    Ok(found) => Some(Ok(found)),
                    Err(e) => self.fail(e),
                };
            }
            // Aliases of the IPv4 subtree
            if self.ipv4_node == Some(frame.record) && (frame.depth != 96 || frame.bits != 0) {
                continue;
            }
            if frame.depth == bit_count {
                return self.fail(MmdbError::InvalidFormat(format!(
                    "search tree deeper than {} bits",
                    bit_count
                )));
            }

            let (left, right) = match (
                self.tree.read_record(frame.record, 0),
                self.tree.read_record(frame.record, 1),
            ) {
                (Ok(left), Ok(right)) => (left, right),
                (Err(e), _) | (_, Err(e)) => return self.fail(e),
            };
            let depth = frame.depth + 1;
            self.stack.push(Frame {
                record: right,
                bits: frame.bits | 1u128 << (bit_count - depth),
                depth,
            });
            self.stack.push(Frame {
                record: left,
                bits: frame.bits,
                depth,
            });
        }
        None
    }
}

fn be_uint(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GeoDatabaseBuilder;
    use crate::data_section::DataValue;

    fn build(networks: &[(&str, &str)]) -> Vec<u8> {
        let mut builder = GeoDatabaseBuilder::new("Test");
        for (network, tag) in networks {
            builder
                .add_network(network, DataValue::String(tag.to_string()))
                .unwrap();
        }
        builder.build().unwrap()
    }

    fn lookup(data: &[u8], ip: &str) -> Option<LookupResult> {
        let header = MmdbHeader::from_file(data).unwrap();
        SearchTree::new(data, &header)
            .lookup(ip.parse().unwrap())
            .unwrap()
    }

    #[test]
    fn test_ipv4_tree_prefix_lengths() {
        let data = build(&[("8.8.8.0/24", "google"), ("1.0.0.0/8", "apnic")]);
        assert_eq!(lookup(&data, "8.8.8.8").unwrap().prefix_len, 24);
        assert_eq!(lookup(&data, "1.2.3.4").unwrap().prefix_len, 8);
        assert!(lookup(&data, "9.9.9.9").is_none());
        // IPv6 only matches an IPv4 tree through the mapped form
        assert!(lookup(&data, "2001:db8::1").is_none());
        assert_eq!(lookup(&data, "::ffff:8.8.8.8").unwrap().prefix_len, 24);
    }

    #[test]
    fn test_ipv4_in_ipv6_tree() {
        let data = build(&[("8.8.8.0/24", "google"), ("2001:4860::/32", "google6")]);
        let header = MmdbHeader::from_file(&data).unwrap();
        assert_eq!(header.ip_version, IpVersion::V6);

        let v4 = lookup(&data, "8.8.8.8").unwrap();
        assert_eq!(v4.prefix_len, 24);
        let v6 = lookup(&data, "2001:4860:4860::8888").unwrap();
        assert_eq!(v6.prefix_len, 32);
        assert_ne!(v4.data_offset, v6.data_offset);
        assert!(lookup(&data, "2a00::1").is_none());
    }

    #[test]
    fn test_cached_ipv4_start_matches() {
        let data = build(&[("8.8.8.0/24", "google"), ("2001:4860::/32", "google6")]);
        let header = MmdbHeader::from_file(&data).unwrap();
        let tree = SearchTree::new(&data, &header);
        let start = tree.ipv4_start_node().unwrap();
        assert_eq!(start.1, 96);

        let cached = SearchTree::new(&data, &header).with_ipv4_start(start);
        let ip: Ipv4Addr = "8.8.8.8".parse().unwrap();
        assert_eq!(tree.lookup_v4(ip).unwrap(), cached.lookup_v4(ip).unwrap());
    }

    fn networks(data: &[u8]) -> Vec<String> {
        let header = MmdbHeader::from_file(data).unwrap();
        SearchTree::new(data, &header)
            .networks()
            .map(|item| item.unwrap().0.to_string())
            .collect()
    }

    #[test]
    fn test_networks_ipv4_tree() {
        let data = build(&[("8.8.8.0/24", "google"), ("1.0.0.0/8", "apnic")]);
        assert_eq!(networks(&data), vec!["1.0.0.0/8", "8.8.8.0/24"]);
    }

    #[test]
    fn test_networks_ipv6_tree_reports_ipv4_subtree_as_ipv4() {
        let data = build(&[
            ("2001:4860::/32", "google6"),
            ("8.8.8.0/24", "google"),
            ("1.1.1.0/24", "cloudflare"),
        ]);
        assert_eq!(
            networks(&data),
            vec!["1.1.1.0/24", "8.8.8.0/24", "2001:4860::/32"]
        );
    }

    #[test]
    fn test_networks_match_point_lookups() {
        let data = build(&[
            ("1.0.0.0/8", "wide"),
            ("1.2.0.0/16", "narrow"),
            ("2a00::/12", "europe"),
        ]);
        let header = MmdbHeader::from_file(&data).unwrap();
        let tree = SearchTree::new(&data, &header);

        let found: Vec<(IpNet, u32)> = tree.networks().map(Result::unwrap).collect();
        // The /8 is split around the more specific /16
        assert!(found.len() > 3);
        for (network, offset) in &found {
            let hit = tree.lookup(network.addr()).unwrap().unwrap();
            assert_eq!(hit.data_offset, *offset);
            assert_eq!(hit.prefix_len, network.prefix_len());
        }
        let narrow = tree.lookup("1.2.3.4".parse().unwrap()).unwrap().unwrap();
        assert_eq!(found.iter().filter(|(_, offset)| *offset == narrow.data_offset).count(), 1);
    }

    #[test]
    fn test_networks_empty_tree() {
        let data = GeoDatabaseBuilder::new("Test").build().unwrap();
        assert!(networks(&data).is_empty());
    }

    #[test]
    fn test_corrupt_tree_is_an_error() {
        let mut data = build(&[("8.8.8.0/24", "google")]);
        let header = MmdbHeader::from_file(&data).unwrap();
        // Point the root's left record deep into the data section
        data[0] = 0xFF;
        data[1] = 0xFF;
        data[2] = 0xFF;
        let tree = SearchTree::new(&data, &header);
        assert!(tree.lookup("1.1.1.1".parse().unwrap()).is_err());
    }
}
