//! Database metadata
//!
//! The metadata block sits at the end of the file, right after a marker
//! sequence. It is a single encoded map; only `node_count`, `record_size` and
//! `ip_version` are needed for lookups, everything else is informational.
//!
//! Design:
//! - Find the marker in the last 128KB (single read, no per-byte I/O)
//! - Decode the map with the regular data decoder
//! - Derive the search tree geometry from the three required fields

use crate::decoder::DataDecoder;
use crate::error::{IpdbError, Result};
use crate::source::ByteSource;
use crate::value::DataValue;
use serde::Serialize;
use std::collections::BTreeMap;

/// Metadata marker: "\xAB\xCD\xEFipplus360.com" (16 bytes)
pub const METADATA_MARKER: &[u8; 16] = b"\xAB\xCD\xEFipplus360.com";

/// Only this many trailing bytes are searched for the marker
pub const METADATA_SEARCH_SIZE: u64 = 128 * 1024;

/// Size of the reserved gap between search tree and data section
pub const DATA_SECTION_SEPARATOR_SIZE: u64 = 16;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum IpVersion {
    /// IPv4 only (32-bit keys)
    V4,
    /// IPv6 (128-bit keys, may include IPv4 under ::/96)
    V6,
}

impl IpVersion {
    /// Number of address bits the search tree is keyed on
    pub fn bit_count(self) -> usize {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }
}

impl From<IpVersion> for u8 {
    fn from(v: IpVersion) -> u8 {
        match v {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u16")]
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
    pub fn node_bytes(self) -> u64 {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(IpdbError::corrupt(format!(
                "unsupported record size: {} bits",
                bits
            ))),
        }
    }
}

impl From<RecordSize> for u16 {
    fn from(r: RecordSize) -> u16 {
        r as u16
    }
}

/// Decoded database metadata
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28, or 32)
    pub record_size: RecordSize,
    /// IP version (4 or 6)
    pub ip_version: IpVersion,
    /// Format major version, if present
    pub binary_format_major_version: Option<u16>,
    /// Format minor version, if present
    pub binary_format_minor_version: Option<u16>,
    /// Build time as seconds since the Unix epoch, if present
    pub build_epoch: Option<u64>,
    /// Free-form database type name, e.g. "GeoIP2-City"
    pub database_type: Option<String>,
    /// Locale codes the records may contain names for
    pub languages: Vec<String>,
    /// Descriptions keyed by language
    pub description: BTreeMap<String, String>,
    /// The full metadata map as decoded
    #[serde(skip)]
    pub raw: DataValue,
}

impl Metadata {
    /// Build metadata from the decoded metadata map
    pub fn from_value(value: DataValue) -> Result<Self> {
        let map = match &value {
            DataValue::Map(map) => map,
            other => {
                return Err(IpdbError::corrupt(format!(
                    "metadata is a {}, not a map",
                    other.kind()
                )))
            }
        };

        let node_count = required_uint(map, "node_count")?;
        let node_count = u32::try_from(node_count)
            .map_err(|_| IpdbError::corrupt(format!("node_count {} is too large", node_count)))?;
        let record_size = RecordSize::from_bits(required_uint(map, "record_size")?)?;
        let ip_version = match required_uint(map, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(IpdbError::corrupt(format!(
                    "unsupported ip_version: {}",
                    other
                )))
            }
        };

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().ok().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        let description = match map.get("description") {
            Some(DataValue::Map(entries)) => entries
                .iter()
                .filter_map(|(lang, v)| v.as_str().ok().map(|s| (lang.clone(), s.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };

        Ok(Metadata {
            node_count,
            record_size,
            ip_version,
            binary_format_major_version: optional_uint(map, "binary_format_major_version")
                .and_then(|n| u16::try_from(n).ok()),
            binary_format_minor_version: optional_uint(map, "binary_format_minor_version")
                .and_then(|n| u16::try_from(n).ok()),
            build_epoch: optional_uint(map, "build_epoch"),
            database_type: map
                .get("database_type")
                .and_then(|v| v.as_str().ok())
                .map(str::to_string),
            languages,
            description,
            raw: value,
        })
    }

    /// Bytes per search tree node (`record_size * 2 / 8`)
    pub fn node_byte_size(&self) -> u64 {
        self.record_size.node_bytes()
    }

    /// Total size of the search tree in bytes
    pub fn search_tree_size(&self) -> u64 {
        u64::from(self.node_count) * self.node_byte_size()
    }

    /// Offset of the first byte of the data section
    pub fn data_section_start(&self) -> u64 {
        self.search_tree_size() + DATA_SECTION_SEPARATOR_SIZE
    }
}

/// Find where the metadata map starts
///
/// The marker can appear more than once (data may contain the same bytes),
/// so the last occurrence within the trailing 128KB wins.
pub fn find_metadata_start(source: &dyn ByteSource) -> Result<u64> {
    let size = source.size();
    let window = size.min(METADATA_SEARCH_SIZE);
    let window_start = size - window;
    let tail = source.read(window_start, window as usize)?;

    memchr::memmem::rfind(&tail, METADATA_MARKER)
        .map(|pos| window_start + (pos + METADATA_MARKER.len()) as u64)
        .ok_or_else(|| {
            IpdbError::corrupt("metadata marker not found; is this a valid IP database file?")
        })
}

/// Locate, decode and validate the metadata block
pub fn locate_and_parse(source: &dyn ByteSource) -> Result<Metadata> {
    let start = find_metadata_start(source)?;
    let decoder = DataDecoder::new(source, start);
    let (value, _) = decoder.decode(start)?;
    let metadata = Metadata::from_value(value)?;

    if metadata.search_tree_size() > source.size() {
        return Err(IpdbError::corrupt(format!(
            "search tree of {} bytes does not fit in a {} byte file",
            metadata.search_tree_size(),
            source.size()
        )));
    }
    Ok(metadata)
}

fn optional_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Option<u64> {
    map.get(key).and_then(|v| v.as_u64().ok())
}

fn required_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(value) => value.as_u64().map_err(|_| {
            IpdbError::corrupt(format!(
                "metadata field '{}' is a {}, not an unsigned integer",
                key,
                value.kind()
            ))
        }),
        None => Err(IpdbError::corrupt(format!(
            "required metadata field '{}' not found",
            key
        ))),
    }
}
