//! Search Tree Traversal
//!
//! Implements binary search tree traversal for IP address lookups.
//! The tree uses a compact binary representation where each node contains
//! two records (left for bit 0, right for bit 1). A record value `v` is:
//! - `v < node_count`: another node (continue traversal)
//! - `v == node_count`: "not found" marker
//! - `v > node_count`: a pointer into the data section
//!
//! Node `n` lives at byte `n * node_byte_size`. Records are 24, 28 or 32 bits;
//! the 28-bit layout shares its middle byte between the two records:
//!
//! ```text
//! [ left bits 0-23 ][ left 24-27 | right 24-27 ][ right bits 0-23 ]
//! ```

use crate::error::{IpdbError, Result};
use crate::metadata::{IpVersion, Metadata, RecordSize};
use crate::source::ByteSource;
use std::net::IpAddr;

/// Result of a tree walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Raw record value pointing into the data section, `None` when the walk
    /// ended on the "not found" marker
    pub pointer: Option<u32>,
    /// Number of address bits consumed (the matched prefix length)
    pub prefix_len: u8,
}

/// Search tree geometry plus the cached IPv4 start node
///
/// Holds no borrowed data: every read goes through the byte source passed in,
/// so one `SearchTree` is shared by all concurrent lookups on a database.
#[derive(Debug, Clone)]
pub struct SearchTree {
    node_count: u32,
    record_size: RecordSize,
    ip_version: IpVersion,
    node_byte_size: u64,
    search_tree_size: u64,
    ipv4_start_node: u32,
}

impl SearchTree {
    /// Set up the tree for `metadata`, computing the IPv4 start node eagerly
    pub fn new(source: &dyn ByteSource, metadata: &Metadata) -> Result<Self> {
        let mut tree = Self {
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            node_byte_size: metadata.node_byte_size(),
            search_tree_size: metadata.search_tree_size(),
            ipv4_start_node: 0,
        };
        if tree.ip_version == IpVersion::V6 {
            tree.ipv4_start_node = tree.find_ipv4_start_node(source)?;
        }
        Ok(tree)
    }

    /// Number of nodes; also the "not found" record value
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Address family the tree is keyed on
    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    /// Node where IPv4 lookups start (0 for IPv4 trees)
    pub fn ipv4_start_node(&self) -> u32 {
        self.ipv4_start_node
    }

    /// Total tree size in bytes
    pub fn search_tree_size(&self) -> u64 {
        self.search_tree_size
    }

    /// Walk the tree for `addr`
    ///
    /// Fails with [`IpdbError::InvalidArgument`] for an IPv6 address against an
    /// IPv4-only tree.
    pub fn lookup(&self, source: &dyn ByteSource, addr: IpAddr) -> Result<LookupResult> {
        let result = match addr {
            IpAddr::V4(v4) => self.find(source, &v4.octets())?,
            IpAddr::V6(v6) => {
                if self.ip_version == IpVersion::V4 {
                    return Err(IpdbError::InvalidArgument(format!(
                        "Error looking up {}. You attempted to look up an IPv6 address in an IPv4-only database",
                        addr
                    )));
                }
                self.find(source, &v6.octets())?
            }
        };
        log::trace!(
            "tree walk for {}: pointer={:?} prefix_len={}",
            addr,
            result.pointer,
            result.prefix_len
        );
        Ok(result)
    }

    /// Walk the tree over the bits of `address` (4 or 16 bytes, network order)
    fn find(&self, source: &dyn ByteSource, address: &[u8]) -> Result<LookupResult> {
        let bit_count = address.len() * 8;
        let mut node = self.start_node(bit_count);
        let mut depth = 0usize;

        while depth < bit_count && node < self.node_count {
            let bit = (address[depth >> 3] >> (7 - (depth & 7))) & 1;
            node = self.read_record(source, node, bit)?;
            depth += 1;
        }

        let prefix_len = depth as u8;
        if node == self.node_count {
            Ok(LookupResult {
                pointer: None,
                prefix_len,
            })
        } else if node > self.node_count {
            Ok(LookupResult {
                pointer: Some(node),
                prefix_len,
            })
        } else {
            Err(IpdbError::corrupt("invalid node in search tree"))
        }
    }

    fn start_node(&self, bit_count: usize) -> u32 {
        if self.ip_version == IpVersion::V6 && bit_count == 32 {
            self.ipv4_start_node
        } else {
            0
        }
    }

    /// Follow 96 left records from the root: IPv4 lives under ::/96
    fn find_ipv4_start_node(&self, source: &dyn ByteSource) -> Result<u32> {
        let mut node = 0u32;
        for _ in 0..96 {
            if node >= self.node_count {
                break;
            }
            node = self.read_record(source, node, 0)?;
        }
        Ok(node)
    }

    /// Read both records of `node`
    pub fn read_node(&self, source: &dyn ByteSource, node: u32) -> Result<(u32, u32)> {
        Ok((
            self.read_record(source, node, 0)?,
            self.read_record(source, node, 1)?,
        ))
    }

    /// Read a record from a node
    ///
    /// Each node contains two records. `side` determines which:
    /// - 0 = left record (for IP bit 0)
    /// - 1 = right record (for IP bit 1)
    pub fn read_record(&self, source: &dyn ByteSource, node: u32, side: u8) -> Result<u32> {
        let node_offset = u64::from(node) * self.node_byte_size;
        let side = u64::from(side & 1);

        match self.record_size {
            RecordSize::Bits24 => {
                let b = source.read(node_offset + side * 3, 3)?;
                Ok((u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]))
            }
            RecordSize::Bits28 => {
                if side == 0 {
                    let b = source.read(node_offset, 4)?;
                    let high = (u32::from(b[3]) & 0xF0) << 20;
                    Ok(high | (u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]))
                } else {
                    let b = source.read(node_offset + 3, 4)?;
                    Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]) & 0x0FFF_FFFF)
                }
            }
            RecordSize::Bits32 => {
                let b = source.read(node_offset + side * 4, 4)?;
                Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
        }
    }

    /// Turn a data pointer record into an absolute file offset
    ///
    /// `record - node_count` is relative to the end of the tree; the 16-byte
    /// separator is included in that distance.
    pub fn resolve_data_offset(&self, pointer: u32, file_size: u64) -> Result<u64> {
        let resolved = u64::from(pointer)
            .checked_sub(u64::from(self.node_count))
            .map(|rel| rel + self.search_tree_size)
            .ok_or_else(|| IpdbError::corrupt("search tree is corrupt"))?;
        if resolved >= file_size {
            return Err(IpdbError::corrupt("search tree is corrupt"));
        }
        Ok(resolved)
    }
}
