//! Test-only database writer
//!
//! Builds complete database images in memory: a search tree with 24, 28 or
//! 32-bit records, the 16-byte separator, an encoded data section, the
//! metadata marker and the metadata map.
//!
//! Networks are inserted broadest first. Inserting a more specific network
//! under an existing data record splits that record, so the broader network
//! keeps covering the remaining addresses.

#![allow(dead_code)]

use ipdb::DataValue;
use ipnet::IpNet;
use std::collections::{BTreeMap, HashMap};

pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFipplus360.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Empty,
    Node(u32),
    Data(u32),
}

pub struct TestDbWriter {
    ip_version: u8,
    record_size: u16,
    nodes: Vec<[Record; 2]>,
    data: Vec<u8>,
    dedup: HashMap<Vec<u8>, u32>,
    database_type: String,
    description: BTreeMap<String, String>,
    languages: Vec<String>,
    build_epoch: u64,
}

impl TestDbWriter {
    pub fn new(ip_version: u8, record_size: u16) -> Self {
        assert!(ip_version == 4 || ip_version == 6);
        Self {
            ip_version,
            record_size,
            nodes: vec![[Record::Empty, Record::Empty]],
            data: Vec::new(),
            dedup: HashMap::new(),
            database_type: "ipdb-test".to_string(),
            description: BTreeMap::new(),
            languages: Vec::new(),
            build_epoch: 1_700_000_000,
        }
    }

    pub fn database_type(mut self, name: &str) -> Self {
        self.database_type = name.to_string();
        self
    }

    pub fn description(mut self, lang: &str, text: &str) -> Self {
        self.description.insert(lang.to_string(), text.to_string());
        self.languages.push(lang.to_string());
        self
    }

    /// Append a value to the data section, reusing an identical earlier copy
    pub fn add_value(&mut self, value: &DataValue) -> u32 {
        let mut bytes = Vec::new();
        encode_value(value, &mut bytes);
        if let Some(&offset) = self.dedup.get(&bytes) {
            return offset;
        }
        let offset = self.add_raw(&bytes);
        self.dedup.insert(bytes, offset);
        offset
    }

    /// Append pre-encoded bytes to the data section
    pub fn add_raw(&mut self, bytes: &[u8]) -> u32 {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        offset
    }

    pub fn insert(&mut self, cidr: &str, value: &DataValue) {
        let offset = self.add_value(value);
        self.insert_offset(cidr, offset);
    }

    /// Point a network at an existing data section offset
    pub fn insert_offset(&mut self, cidr: &str, offset: u32) {
        let (bits, prefix_len) = self.network_bits(cidr);
        self.set_record(bits, prefix_len, Record::Data(offset));
    }

    /// Point `::ffff:0:0/96` at the IPv4 subtree under `::/96`
    pub fn alias_ipv4_mapped(&mut self) {
        assert_eq!(self.ip_version, 6);
        let mut node = 0usize;
        for _ in 0..96 {
            node = match self.nodes[node][0] {
                Record::Node(n) => n as usize,
                other => panic!("no IPv4 subtree to alias (found {:?})", other),
            };
        }
        let mapped: u128 = 0xffff << 32;
        self.set_record(mapped, 96, Record::Node(node as u32));
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Absolute file offset of a data section offset
    pub fn file_offset(&self, data_offset: u32) -> u64 {
        self.tree_size() as u64 + 16 + u64::from(data_offset)
    }

    pub fn tree_size(&self) -> usize {
        self.nodes.len() * (self.record_size as usize / 4)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.tree_size() + 16 + self.data.len() + 256);
        let node_count = self.node_count();
        let value_of = |record: Record| match record {
            Record::Empty => node_count,
            Record::Node(n) => n,
            Record::Data(offset) => node_count + 16 + offset,
        };

        for [left, right] in &self.nodes {
            write_node(&mut out, self.record_size, value_of(*left), value_of(*right));
        }
        out.extend_from_slice(&[0u8; 16]);
        out.extend_from_slice(&self.data);
        out.extend_from_slice(METADATA_MARKER);
        encode_value(&self.metadata_value(), &mut out);
        out
    }

    fn metadata_value(&self) -> DataValue {
        let description = self
            .description
            .iter()
            .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
            .collect();
        let languages = self
            .languages
            .iter()
            .map(|l| DataValue::String(l.clone()))
            .collect();

        map(vec![
            ("node_count", DataValue::Uint32(self.node_count())),
            ("record_size", DataValue::Uint16(self.record_size)),
            ("ip_version", DataValue::Uint16(u16::from(self.ip_version))),
            ("binary_format_major_version", DataValue::Uint16(2)),
            ("binary_format_minor_version", DataValue::Uint16(0)),
            ("build_epoch", DataValue::Uint64(self.build_epoch)),
            ("database_type", DataValue::String(self.database_type.clone())),
            ("languages", DataValue::Array(languages)),
            ("description", DataValue::Map(description)),
        ])
    }

    fn network_bits(&self, cidr: &str) -> (u128, u8) {
        let net: IpNet = cidr.parse().expect("valid CIDR");
        let net = net.trunc();
        match (net, self.ip_version) {
            (IpNet::V4(v4), 4) => (u128::from(u32::from(v4.addr())), v4.prefix_len()),
            (IpNet::V4(v4), _) => (u128::from(u32::from(v4.addr())), v4.prefix_len() + 96),
            (IpNet::V6(v6), 6) => (u128::from(v6.addr()), v6.prefix_len()),
            (IpNet::V6(_), _) => panic!("IPv6 network in an IPv4 database"),
        }
    }

    fn set_record(&mut self, bits: u128, prefix_len: u8, record: Record) {
        assert!(prefix_len > 0, "the root cannot hold data");
        let bit_count: u8 = if self.ip_version == 4 { 32 } else { 128 };
        let mut node = 0usize;

        for depth in 0..prefix_len {
            let bit = ((bits >> (bit_count - 1 - depth)) & 1) as usize;
            if depth == prefix_len - 1 {
                self.nodes[node][bit] = record;
                return;
            }
            node = match self.nodes[node][bit] {
                Record::Node(n) => n as usize,
                existing => {
                    let child = self.nodes.len();
                    self.nodes.push([existing, existing]);
                    self.nodes[node][bit] = Record::Node(child as u32);
                    child
                }
            };
        }
    }
}

pub fn write_node(out: &mut Vec<u8>, record_size: u16, left: u32, right: u32) {
    match record_size {
        24 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        28 => {
            out.extend_from_slice(&left.to_be_bytes()[1..]);
            out.push((((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8);
            out.extend_from_slice(&right.to_be_bytes()[1..]);
        }
        32 => {
            out.extend_from_slice(&left.to_be_bytes());
            out.extend_from_slice(&right.to_be_bytes());
        }
        other => panic!("unsupported record size {}", other),
    }
}

pub fn map(entries: Vec<(&str, DataValue)>) -> DataValue {
    DataValue::Map(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}

pub fn string(s: &str) -> DataValue {
    DataValue::String(s.to_string())
}

/// Control byte(s) for a type and payload size
pub fn encode_ctrl(type_id: u8, size: usize, out: &mut Vec<u8>) {
    let (size_bits, extra): (u8, Vec<u8>) = if size < 29 {
        (size as u8, Vec::new())
    } else if size < 285 {
        (29, vec![(size - 29) as u8])
    } else if size < 65821 {
        (30, ((size - 285) as u16).to_be_bytes().to_vec())
    } else {
        (31, ((size - 65821) as u32).to_be_bytes()[1..].to_vec())
    };

    if type_id <= 7 {
        out.push((type_id << 5) | size_bits);
    } else {
        out.push(size_bits);
        out.push(type_id - 7);
    }
    out.extend_from_slice(&extra);
}

/// Pointer to a data section offset, using the smallest size class
pub fn encode_pointer(target: u32, out: &mut Vec<u8>) {
    if target < 2048 {
        out.push(0x20 | ((target >> 8) & 0x07) as u8);
        out.push(target as u8);
    } else if target < 526_336 {
        let v = target - 2048;
        out.push(0x28 | ((v >> 16) & 0x07) as u8);
        out.extend_from_slice(&v.to_be_bytes()[2..]);
    } else if target < 134_744_064 {
        let v = target - 526_336;
        out.push(0x30 | ((v >> 24) & 0x07) as u8);
        out.extend_from_slice(&v.to_be_bytes()[1..]);
    } else {
        out.push(0x38);
        out.extend_from_slice(&target.to_be_bytes());
    }
}

fn minimal_be(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first..]
}

pub fn encode_value(value: &DataValue, out: &mut Vec<u8>) {
    match value {
        DataValue::String(s) => {
            encode_ctrl(2, s.len(), out);
            out.extend_from_slice(s.as_bytes());
        }
        DataValue::Double(d) => {
            encode_ctrl(3, 8, out);
            out.extend_from_slice(&d.to_be_bytes());
        }
        DataValue::Bytes(b) => {
            encode_ctrl(4, b.len(), out);
            out.extend_from_slice(b);
        }
        DataValue::Uint16(n) => {
            let bytes = n.to_be_bytes();
            let payload = minimal_be(&bytes);
            encode_ctrl(5, payload.len(), out);
            out.extend_from_slice(payload);
        }
        DataValue::Uint32(n) => {
            let bytes = n.to_be_bytes();
            let payload = minimal_be(&bytes);
            encode_ctrl(6, payload.len(), out);
            out.extend_from_slice(payload);
        }
        DataValue::Map(m) => {
            encode_ctrl(7, m.len(), out);
            for (k, v) in m {
                encode_ctrl(2, k.len(), out);
                out.extend_from_slice(k.as_bytes());
                encode_value(v, out);
            }
        }
        DataValue::Int32(n) => {
            let bytes = (*n as u32).to_be_bytes();
            let payload = minimal_be(&bytes);
            encode_ctrl(8, payload.len(), out);
            out.extend_from_slice(payload);
        }
        DataValue::Uint64(n) => {
            let bytes = n.to_be_bytes();
            let payload = minimal_be(&bytes);
            encode_ctrl(9, payload.len(), out);
            out.extend_from_slice(payload);
        }
        DataValue::Uint128(n) => {
            let bytes = n.to_be_bytes();
            let payload = minimal_be(&bytes);
            encode_ctrl(10, payload.len(), out);
            out.extend_from_slice(payload);
        }
        DataValue::Array(items) => {
            encode_ctrl(11, items.len(), out);
            for item in items {
                encode_value(item, out);
            }
        }
        DataValue::Bool(b) => encode_ctrl(14, usize::from(*b), out),
        DataValue::Float(f) => {
            encode_ctrl(15, 4, out);
            out.extend_from_slice(&f.to_be_bytes());
        }
    }
}

/// The two-network IPv4 database: 0.0.0.0/1 has `{"areacode": "110000"}`,
/// 128.0.0.0/1 has nothing
pub fn areacode_db() -> Vec<u8> {
    let mut writer = TestDbWriter::new(4, 24).database_type("areacode");
    writer.insert("0.0.0.0/1", &map(vec![("areacode", string("110000"))]));
    writer.build()
}

/// A city-style IPv6 database with IPv4 data, nested records and aliases
pub fn city_db(record_size: u16) -> Vec<u8> {
    let mut writer = TestDbWriter::new(6, record_size)
        .database_type("ipdb-test-city")
        .description("en", "Test city database")
        .description("zh-CN", "测试");

    let beijing = map(vec![
        (
            "city",
            map(vec![("names", map(vec![("en", string("Beijing"))]))]),
        ),
        (
            "country",
            map(vec![
                ("iso_code", string("CN")),
                ("geoname_id", DataValue::Uint32(1814991)),
            ]),
        ),
        (
            "location",
            map(vec![
                ("latitude", DataValue::Double(39.9289)),
                ("longitude", DataValue::Double(116.3883)),
                ("accuracy_radius", DataValue::Uint16(50)),
            ]),
        ),
    ]);
    let google = map(vec![
        ("country", map(vec![("iso_code", string("US"))])),
        ("anycast", DataValue::Bool(true)),
    ]);
    let google_dns = map(vec![
        ("country", map(vec![("iso_code", string("US"))])),
        ("anycast", DataValue::Bool(true)),
        ("service", string("dns")),
    ]);
    let docs = map(vec![
        ("network_type", string("documentation")),
        ("tags", DataValue::Array(vec![string("rfc3849"), DataValue::Int32(-1)])),
    ]);

    writer.insert("1.0.0.0/8", &beijing);
    writer.insert("8.8.0.0/16", &google);
    writer.insert("8.8.8.0/24", &google_dns);
    writer.insert("2001:db8::/32", &docs);
    writer.insert("2001:db8:1::/48", &beijing);
    writer.alias_ipv4_mapped();
    writer.build()
}
