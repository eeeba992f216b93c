//! Database lookup API
//!
//! [`Database`] ties the pieces together: it opens a byte source, parses the
//! metadata once, prepares the search tree, and then answers lookups by
//! walking the tree and decoding the record it lands on.
//!
//! A `Database` is immutable after construction and is `Send + Sync`, so a
//! single handle can serve lookups from many threads.

use crate::decoder::DataDecoder;
use crate::error::{IpdbError, Result};
use crate::metadata::{self, IpVersion, Metadata};
use crate::source::{open_source, ByteSource, MemorySource, OpenMode};
use crate::tree::SearchTree;
use crate::value::DataValue;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

/// Read-only handle on an IP database file
///
/// # Examples
///
/// ```no_run
/// use ipdb::{Database, OpenMode};
///
/// let db = Database::open_with_mode("GeoLite2-City.mmdb", OpenMode::Mmap)?;
///
/// if let Some(record) = db.get("1.1.1.1")? {
///     println!("Found: {:?}", record.get_path(&["country", "iso_code"]));
/// }
///
/// let (record, prefix_len) = db.get_with_prefix_length("2001:4860:4860::8888")?;
/// println!("/{} -> {:?}", prefix_len, record);
/// # Ok::<(), ipdb::IpdbError>(())
/// ```
pub struct Database {
    source: Box<dyn ByteSource>,
    metadata: Metadata,
    tree: SearchTree,
}

impl Database {
    /// Open a database file, memory-mapping it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_mode(path, OpenMode::Auto)
    }

    /// Open a database file with an explicit storage backend
    pub fn open_with_mode<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let source = open_source(path, mode)?;
        Self::from_source(source)
    }

    /// Create a database from a buffer already in memory
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_source(Box::new(MemorySource::from_bytes(data)))
    }

    /// Create a database over any byte source
    ///
    /// The source is closed before returning if the metadata or the search
    /// tree turn out to be invalid.
    pub fn from_source(mut source: Box<dyn ByteSource>) -> Result<Self> {
        let prepared = metadata::locate_and_parse(source.as_ref()).and_then(|metadata| {
            let tree = SearchTree::new(source.as_ref(), &metadata)?;
            Ok((metadata, tree))
        });

        match prepared {
            Ok((metadata, tree)) => {
                log::debug!(
                    "database ready: node_count={} record_size={} ip_version={} tree_size={} ipv4_start_node={}",
                    metadata.node_count,
                    u16::from(metadata.record_size),
                    u8::from(metadata.ip_version),
                    metadata.search_tree_size(),
                    tree.ipv4_start_node()
                );
                Ok(Self {
                    source,
                    metadata,
                    tree,
                })
            }
            Err(e) => {
                source.close();
                Err(e)
            }
        }
    }

    /// Look up the record for a textual IP address
    ///
    /// Returns `Ok(None)` when the address is not covered by any network.
    pub fn get(&self, ip: &str) -> Result<Option<DataValue>> {
        self.lookup(parse_ip(ip)?)
    }

    /// Look up a textual IP address, also returning the matched prefix length
    ///
    /// When nothing matches, the prefix length is the depth at which the walk
    /// reached the "not found" marker.
    pub fn get_with_prefix_length(&self, ip: &str) -> Result<(Option<DataValue>, u8)> {
        self.lookup_with_prefix_len(parse_ip(ip)?)
    }

    /// Look up the record for an address
    pub fn lookup(&self, addr: IpAddr) -> Result<Option<DataValue>> {
        Ok(self.lookup_with_prefix_len(addr)?.0)
    }

    /// Look up an address, also returning the matched prefix length
    ///
    /// For an IPv4 address in an IPv6 database the prefix length counts only
    /// the 32 IPv4 bits. If the `::/96` path of such a database already ends
    /// in a record, every IPv4 address gets that record with prefix length 0
    /// (and [`lookup_network`](Self::lookup_network) reports `0.0.0.0/0`).
    pub fn lookup_with_prefix_len(&self, addr: IpAddr) -> Result<(Option<DataValue>, u8)> {
        let result = self.tree.lookup(self.source.as_ref(), addr)?;
        let value = match result.pointer {
            Some(pointer) => Some(self.resolve(pointer).inspect_err(|e| {
                log::warn!("lookup of {} hit a corrupt record: {}", addr, e);
            })?),
            None => None,
        };
        Ok((value, result.prefix_len))
    }

    /// Look up an address, returning the record and the network it matched
    ///
    /// The network is `addr` masked to the matched prefix length.
    pub fn lookup_network(&self, addr: IpAddr) -> Result<(Option<DataValue>, IpNet)> {
        let (value, prefix_len) = self.lookup_with_prefix_len(addr)?;
        let network = IpNet::new(addr, prefix_len)
            .map_err(|_| IpdbError::corrupt("search tree is deeper than the address"))?
            .trunc();
        Ok((value, network))
    }

    /// Decode the value at an absolute file offset
    ///
    /// Pointers resolve relative to the data section.
    pub fn decode_at(&self, offset: u64) -> Result<(DataValue, u64)> {
        self.decoder().decode(offset)
    }

    /// Iterate over every network that has a record
    pub fn networks(&self) -> Networks<'_> {
        Networks::new(self)
    }

    /// Parsed metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Close the database, releasing the underlying file or mapping
    pub fn close(mut self) {
        self.source.close();
        log::debug!("database closed");
    }

    fn decoder(&self) -> DataDecoder<'_> {
        DataDecoder::new(self.source.as_ref(), self.metadata.data_section_start())
    }

    fn resolve(&self, pointer: u32) -> Result<DataValue> {
        let offset = self.tree.resolve_data_offset(pointer, self.source.size())?;
        let (value, _) = self.decoder().decode(offset)?;
        Ok(value)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("size", &self.source.size())
            .field("node_count", &self.metadata.node_count)
            .field("record_size", &self.metadata.record_size)
            .field("ip_version", &self.metadata.ip_version)
            .field("database_type", &self.metadata.database_type)
            .finish()
    }
}

fn parse_ip(ip: &str) -> Result<IpAddr> {
    ip.trim().parse::<IpAddr>().map_err(|_| {
        IpdbError::InvalidArgument(format!(
            "'{}' does not appear to be an IPv4 or IPv6 address",
            ip
        ))
    })
}

/// Pending subtree during network iteration
#[derive(Debug, Clone, Copy)]
struct PendingNode {
    /// Address bits collected so far, left-aligned to the tree's bit count
    bits: u128,
    depth: u8,
    record: u32,
}

/// Iterator over `(network, record)` pairs of a database, in address order
///
/// In IPv6 databases the IPv4 subtree is reported once, as IPv4 networks;
/// other paths that lead into it (such as `::ffff:0:0/96`) are skipped.
pub struct Networks<'a> {
    db: &'a Database,
    stack: Vec<PendingNode>,
    bit_count: u8,
    skip_aliases: bool,
    /// Nodes expanded so far; a well-formed tree expands each node once
    expanded: u64,
}

impl<'a> Networks<'a> {
    fn new(db: &'a Database) -> Self {
        let tree = &db.tree;
        let skip_aliases = tree.ip_version() == IpVersion::V6
            && tree.ipv4_start_node() != 0
            && tree.ipv4_start_node() < tree.node_count();
        Self {
            db,
            stack: vec![PendingNode {
                bits: 0,
                depth: 0,
                record: 0,
            }],
            bit_count: tree.ip_version().bit_count() as u8,
            skip_aliases,
            expanded: 0,
        }
    }

    fn is_alias(&self, entry: &PendingNode) -> bool {
        self.skip_aliases
            && entry.record == self.db.tree.ipv4_start_node()
            && !(entry.depth == 96 && entry.bits == 0)
    }

    fn network(&self, entry: &PendingNode) -> Result<IpNet> {
        let net: IpNet = if self.bit_count == 32 {
            Ipv4Net::new(Ipv4Addr::from(entry.bits as u32), entry.depth)
                .map_err(|_| IpdbError::corrupt("invalid prefix length"))?
                .into()
        } else if entry.depth >= 96 && entry.bits >> 32 == 0 {
            Ipv4Net::new(Ipv4Addr::from(entry.bits as u32), entry.depth - 96)
                .map_err(|_| IpdbError::corrupt("invalid prefix length"))?
                .into()
        } else {
            Ipv6Net::new(Ipv6Addr::from(entry.bits), entry.depth)
                .map_err(|_| IpdbError::corrupt("invalid prefix length"))?
                .into()
        };
        Ok(net)
    }

    fn expand(&mut self, entry: PendingNode) -> Result<()> {
        if entry.depth >= self.bit_count {
            return Err(IpdbError::corrupt("invalid node in search tree"));
        }
        self.expanded += 1;
        if self.expanded > u64::from(self.db.tree.node_count()) {
            return Err(IpdbError::corrupt("search tree contains a cycle"));
        }
        let (left, right) = self.db.tree.read_node(self.db.source.as_ref(), entry.record)?;
        let depth = entry.depth + 1;
        let right_bit = 1u128 << (self.bit_count - depth);

        // Right first so the left subtree is visited first
        self.stack.push(PendingNode {
            bits: entry.bits | right_bit,
            depth,
            record: right,
        });
        self.stack.push(PendingNode {
            bits: entry.bits,
            depth,
            record: left,
        });
        Ok(())
    }
}

impl Iterator for Networks<'_> {
    type Item = Result<(IpNet, DataValue)>;

    fn next(&mut self) -> Option<Self::Item> {
        let node_count = self.db.tree.node_count();
        while let Some(entry) = self.stack.pop() {
            if entry.record > node_count {
                let item = self
                    .network(&entry)
                    .and_then(|net| self.db.resolve(entry.record).map(|value| (net, value)));
                if item.is_err() {
                    self.stack.clear();
                }
                return Some(item);
            }
            if entry.record == node_count || self.is_alias(&entry) {
                continue;
            }
            if let Err(e) = self.expand(entry) {
                self.stack.clear();
                return Some(Err(e));
            }
        }
        None
    }
}
