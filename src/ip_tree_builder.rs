//! IP Tree Builder for MMDB Format
//!
//! Builds the binary search tree of an MMDB file. Nodes live in an arena
//! and are serialized in allocation order, so node 0 is always the root.
//! Longest-prefix semantics hold regardless of insertion order: a less
//! specific network never overwrites a more specific one.

use crate::error::BuildError;
use crate::mmdb::types::{IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE};
use ipnet::IpNet;

/// IP tree builder using arena allocation
pub struct IpTreeBuilder {
    nodes: Vec<Node>,
    ip_version: IpVersion,
}

#[derive(Debug, Clone)]
struct Node {
    left: NodePointer,
    right: NodePointer,
}

/// Edge of the tree while building
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodePointer {
    /// Index of another node
    Node(u32),
    /// Data offset, plus the prefix length of the network that set it
    Data(u32, u8),
    /// Not found
    Empty,
}

impl IpTreeBuilder {
    /// Create a builder for a tree of the given IP version
    pub fn new(ip_version: IpVersion) -> Self {
        Self {
            nodes: vec![Node::new_empty()],
            ip_version,
        }
    }

    /// Number of nodes allocated so far
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Insert a network with its data section offset
    ///
    /// IPv4 networks in an IPv6 tree are placed under `::/96`.
    pub fn insert(&mut self, network: &IpNet, data_offset: u32) -> Result<(), BuildError> {
        let (bits, prefix_len) = match (network, self.ip_version) {
            (IpNet::V4(net), IpVersion::V4) => ((u32::from(net.network()) as u128) << 96, net.prefix_len()),
            (IpNet::V4(net), IpVersion::V6) => (u32::from(net.network()) as u128, 96 + net.prefix_len()),
            (IpNet::V6(net), IpVersion::V6) => (u128::from(net.network()), net.prefix_len()),
            (IpNet::V6(_), IpVersion::V4) => {
                return Err(BuildError::InvalidNetwork(format!(
                    "{} (IPv6 network in an IPv4 tree)",
                    network
                )))
            }
        };
        self.insert_bits(bits, prefix_len, data_offset);
        Ok(())
    }

    /// `bits` is left-aligned in a u128 regardless of tree version
    fn insert_bits(&mut self, bits: u128, prefix_len: u8, data_offset: u32) {
        if prefix_len == 0 {
            self.backfill_less_specific(0, data_offset, 0);
            return;
        }

        let mut node_id = 0u32;
        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            let child = self.child(node_id, bit);

            if depth + 1 == prefix_len {
                match child {
                    NodePointer::Empty => {
                        self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                    }
                    NodePointer::Data(_, existing_len) => {
                        if prefix_len >= existing_len {
                            self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                        }
                    }
                    // More specific networks already live below this edge
                    NodePointer::Node(child_id) => {
                        self.backfill_less_specific(child_id, data_offset, prefix_len);
                    }
                }
                return;
            }

            node_id = match child {
                NodePointer::Node(child_id) => child_id,
                NodePointer::Empty => {
                    let new_id = self.allocate_node(NodePointer::Empty);
                    self.set_child(node_id, bit, NodePointer::Node(new_id));
                    new_id
                }
                // A less specific network ends here: split it so both halves
                // keep its data, then keep descending
                existing @ NodePointer::Data(..) => {
                    let new_id = self.allocate_node(existing);
                    self.set_child(node_id, bit, NodePointer::Node(new_id));
                    new_id
                }
            };
        }
    }

    fn child(&self, node_id: u32, bit: u8) -> NodePointer {
        let node = &self.nodes[node_id as usize];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn set_child(&mut self, node_id: u32, bit: u8, pointer: NodePointer) {
        let node = &mut self.nodes[node_id as usize];
        if bit == 0 {
            node.left = pointer;
        } else {
            node.right = pointer;
        }
    }

    fn allocate_node(&mut self, fill: NodePointer) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node {
            left: fill,
            right: fill,
        });
        id
    }

    /// Fill empty and less specific edges of a subtree with `data_offset`
    fn backfill_less_specific(&mut self, node_id: u32, data_offset: u32, prefix_len: u8) {
        for bit in [0u8, 1] {
            match self.child(node_id, bit) {
                NodePointer::Empty => {
                    self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                }
                NodePointer::Data(_, existing_len) if prefix_len > existing_len => {
                    self.set_child(node_id, bit, NodePointer::Data(data_offset, prefix_len));
                }
                NodePointer::Data(..) => {}
                NodePointer::Node(child_id) => {
                    self.backfill_less_specific(child_id, data_offset, prefix_len);
                }
            }
        }
    }

    /// Serialize the tree for a data section of `data_len` bytes
    ///
    /// Picks the narrowest record size able to address every node and data
    /// offset. Returns `(tree_bytes, node_count, record_size)`.
    pub fn build(&self, data_len: usize) -> Result<(Vec<u8>, u32, RecordSize), BuildError> {
        let node_count = self.node_count();
        let max_record = node_count as u64 + DATA_SECTION_SEPARATOR_SIZE as u64 + data_len as u64;

        let record_size = [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32]
            .into_iter()
            .find(|size| max_record <= size.max_value())
            .ok_or_else(|| {
                BuildError::TooLarge(format!(
                    "{} nodes and {} data bytes exceed 32-bit records",
                    node_count, data_len
                ))
            })?;

        let node_size = record_size.node_bytes();
        let mut tree = vec![0u8; node_count as usize * node_size];

        for (node_id, node) in self.nodes.iter().enumerate() {
            let left = pointer_to_value(node.left, node_count);
            let right = pointer_to_value(node.right, node_count);
            let out = &mut tree[node_id * node_size..(node_id + 1) * node_size];
            write_node(out, record_size, left, right);
        }

        Ok((tree, node_count, record_size))
    }
}

impl Node {
    fn new_empty() -> Self {
        Self {
            left: NodePointer::Empty,
            right: NodePointer::Empty,
        }
    }
}

/// Record value of an edge; prefix lengths only matter while building
fn pointer_to_value(pointer: NodePointer, node_count: u32) -> u32 {
    match pointer {
        NodePointer::Empty => node_count,
        NodePointer::Node(id) => id,
        NodePointer::Data(offset, _) => node_count + DATA_SECTION_SEPARATOR_SIZE as u32 + offset,
    }
}

fn write_node(out: &mut [u8], record_size: RecordSize, left: u32, right: u32) {
    let l = left.to_be_bytes();
    let r = right.to_be_bytes();
    match record_size {
        RecordSize::Bits24 => {
            out[0..3].copy_from_slice(&l[1..]);
            out[3..6].copy_from_slice(&r[1..]);
        }
        RecordSize::Bits28 => {
            out[0..3].copy_from_slice(&l[1..]);
            out[3] = ((l[0] & 0x0F) << 4) | (r[0] & 0x0F);
            out[4..7].copy_from_slice(&r[1..]);
        }
        RecordSize::Bits32 => {
            out[0..4].copy_from_slice(&l);
            out[4..8].copy_from_slice(&r);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    /// Walk the in-memory tree, returning the data offset for `bits`
    fn resolve(builder: &IpTreeBuilder, bits: u128) -> Option<u32> {
        let mut node = 0u32;
        for depth in 0..128 {
            let bit = ((bits >> (127 - depth)) & 1) as u8;
            match builder.child(node, bit) {
                NodePointer::Node(next) => node = next,
                NodePointer::Data(offset, _) => return Some(offset),
                NodePointer::Empty => return None,
            }
        }
        None
    }

    fn v4_bits(ip: &str) -> u128 {
        (u32::from(ip.parse::<std::net::Ipv4Addr>().unwrap()) as u128) << 96
    }

    #[test]
    fn test_build_empty_tree() {
        let builder = IpTreeBuilder::new(IpVersion::V4);
        let (bytes, node_count, record_size) = builder.build(0).unwrap();
        assert_eq!(node_count, 1);
        assert_eq!(record_size, RecordSize::Bits24);
        // Both records of the root are "not found" (== node_count)
        assert_eq!(bytes, vec![0, 0, 1, 0, 0, 1]);
    }

    #[test]
    fn test_longest_prefix_any_order() {
        for order in [[0, 1], [1, 0]] {
            let nets = [(net("192.168.0.0/16"), 100), (net("192.168.1.0/24"), 200)];
            let mut builder = IpTreeBuilder::new(IpVersion::V4);
            for i in order {
                builder.insert(&nets[i].0, nets[i].1).unwrap();
            }
            assert_eq!(resolve(&builder, v4_bits("192.168.1.7")), Some(200));
            assert_eq!(resolve(&builder, v4_bits("192.168.2.7")), Some(100));
            assert_eq!(resolve(&builder, v4_bits("10.0.0.1")), None);
        }
    }

    #[test]
    fn test_default_route() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4);
        builder.insert(&net("8.8.8.0/24"), 7).unwrap();
        builder.insert(&net("0.0.0.0/0"), 1).unwrap();
        assert_eq!(resolve(&builder, v4_bits("8.8.8.8")), Some(7));
        assert_eq!(resolve(&builder, v4_bits("203.0.113.9")), Some(1));
    }

    #[test]
    fn test_ipv6_network_in_ipv4_tree_fails() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4);
        assert!(builder.insert(&net("2001:db8::/32"), 1).is_err());
    }

    #[test]
    fn test_record_size_grows_with_data() {
        let mut builder = IpTreeBuilder::new(IpVersion::V4);
        builder.insert(&net("1.0.0.0/8"), 0).unwrap();
        let (_, _, small) = builder.build(1024).unwrap();
        assert_eq!(small, RecordSize::Bits24);
        let (bytes, nodes, large) = builder.build(1 << 24).unwrap();
        assert_eq!(large, RecordSize::Bits28);
        assert_eq!(bytes.len(), nodes as usize * 7);
        let (_, _, huge) = builder.build(1 << 29).unwrap();
        assert_eq!(huge, RecordSize::Bits32);
    }

    #[test]
    fn test_28bit_node_layout() {
        let mut out = [0u8; 7];
        write_node(&mut out, RecordSize::Bits28, 0x0ABC_DEF1, 0x0123_4567);
        assert_eq!(out, [0xBC, 0xDE, 0xF1, 0xA1, 0x23, 0x45, 0x67]);
    }
}
