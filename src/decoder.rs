//! Data section decoding
//!
//! Implements the MaxMind DB data type encoding. Each value starts with a
//! control byte: the top 3 bits are the type, the low 5 bits the size.
//!
//! ```text
//!   7 6 5 4 3 2 1 0
//!  [ type | size    ]  [ext type]?  [size bytes 0..3]  [payload ...]
//! ```
//!
//! - Type 0 means "extended": the real type is `7 + next byte`.
//! - Sizes 0-28 are inline. 29, 30 and 31 add 1, 2 or 3 big-endian bytes on
//!   top of a base of 29, 285 and 65821 respectively.
//! - Pointers (type 1) reuse the size bits: bits 3-4 select a 1-4 byte
//!   pointer, bits 0-2 are the high bits of the 1-3 byte forms. The decoded
//!   value is relative to the data section start.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{IpdbError, Result};
use crate::source::ByteSource;
use crate::value::DataValue;
use std::collections::BTreeMap;

/// Nesting limit for composites and pointer hops combined.
/// Untrusted files may contain pointer cycles; this turns them into an error.
pub const MAX_DECODE_DEPTH: usize = 256;

/// Upper bound on array slots reserved before any element is decoded
const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Base added to 2-, 3- and 4-byte pointers (indexed by size class)
const POINTER_BASES: [u64; 4] = [0, 2048, 526_336, 0];

/// Data types of the encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataType {
    Pointer,
    String,
    Double,
    Bytes,
    Uint16,
    Uint32,
    Map,
    Int32,
    Uint64,
    Uint128,
    Array,
    Container,
    EndMarker,
    Bool,
    Float,
}

impl DataType {
    fn from_id(id: u16) -> Result<Self> {
        Ok(match id {
            1 => DataType::Pointer,
            2 => DataType::String,
            3 => DataType::Double,
            4 => DataType::Bytes,
            5 => DataType::Uint16,
            6 => DataType::Uint32,
            7 => DataType::Map,
            8 => DataType::Int32,
            9 => DataType::Uint64,
            10 => DataType::Uint128,
            11 => DataType::Array,
            12 => DataType::Container,
            13 => DataType::EndMarker,
            14 => DataType::Bool,
            15 => DataType::Float,
            _ => return Err(IpdbError::decode(format!("unknown data type {}", id))),
        })
    }
}

/// Decodes values from a byte source
///
/// Offsets passed to [`decode`](Self::decode) are absolute positions in the
/// source. Pointers inside the encoding are relative to `pointer_base`: the
/// data section start for records, the metadata start for the metadata map.
pub struct DataDecoder<'a> {
    source: &'a dyn ByteSource,
    pointer_base: u64,
}

impl<'a> DataDecoder<'a> {
    /// Create a decoder whose pointers resolve relative to `pointer_base`
    pub fn new(source: &'a dyn ByteSource, pointer_base: u64) -> Self {
        Self {
            source,
            pointer_base,
        }
    }

    /// Decode the value at `offset`
    ///
    /// Returns the value and the offset immediately after its encoding. When
    /// the value at `offset` is a pointer, the returned offset is the one
    /// after the pointer itself, not after the pointed-to data.
    pub fn decode(&self, offset: u64) -> Result<(DataValue, u64)> {
        self.decode_at(offset, 0)
    }

    fn decode_at(&self, offset: u64, depth: usize) -> Result<(DataValue, u64)> {
        if depth > MAX_DECODE_DEPTH {
            return Err(IpdbError::decode(format!(
                "exceeded maximum data structure depth of {} at offset {}",
                MAX_DECODE_DEPTH, offset
            )));
        }
        if offset >= self.source.size() {
            return Err(IpdbError::decode(format!(
                "offset {} is beyond the end of the database ({} bytes)",
                offset,
                self.source.size()
            )));
        }

        let ctrl = self.read_u8(offset)?;
        let mut cursor = offset + 1;

        let mut type_id = u16::from(ctrl >> 5);
        if type_id == 0 {
            let ext = self.read_u8(cursor)?;
            cursor += 1;
            type_id = 7 + u16::from(ext);
            if type_id < 8 {
                return Err(IpdbError::decode(format!(
                    "invalid extended type {} at offset {}",
                    ext, offset
                )));
            }
        }
        let data_type = DataType::from_id(type_id)?;

        if data_type == DataType::Pointer {
            return self.decode_pointer(ctrl, cursor, depth);
        }

        let (size, cursor) = self.decode_size(ctrl & 0x1F, cursor)?;
        self.decode_payload(data_type, size, cursor, depth)
    }

    fn decode_payload(
        &self,
        data_type: DataType,
        size: usize,
        cursor: u64,
        depth: usize,
    ) -> Result<(DataValue, u64)> {
        match data_type {
            DataType::String => {
                let bytes = self.source.read(cursor, size)?;
                let s = std::str::from_utf8(&bytes)
                    .map_err(|e| IpdbError::decode(format!("invalid UTF-8 in string: {}", e)))?;
                Ok((DataValue::String(s.to_string()), cursor + size as u64))
            }
            DataType::Double => {
                let bytes = self.read_exact_size::<8>(cursor, size, "double")?;
                Ok((DataValue::Double(f64::from_be_bytes(bytes)), cursor + 8))
            }
            DataType::Float => {
                let bytes = self.read_exact_size::<4>(cursor, size, "float")?;
                Ok((DataValue::Float(f32::from_be_bytes(bytes)), cursor + 4))
            }
            DataType::Bytes => {
                let bytes = self.source.read(cursor, size)?;
                Ok((DataValue::Bytes(bytes.into_owned()), cursor + size as u64))
            }
            DataType::Uint16 => {
                let n = self.read_uint(cursor, size, 2, "uint16")?;
                Ok((DataValue::Uint16(n as u16), cursor + size as u64))
            }
            DataType::Uint32 => {
                let n = self.read_uint(cursor, size, 4, "uint32")?;
                Ok((DataValue::Uint32(n as u32), cursor + size as u64))
            }
            DataType::Int32 => {
                let n = self.read_uint(cursor, size, 4, "int32")?;
                Ok((DataValue::Int32(n as u32 as i32), cursor + size as u64))
            }
            DataType::Uint64 => {
                let n = self.read_uint(cursor, size, 8, "uint64")?;
                Ok((DataValue::Uint64(n as u64), cursor + size as u64))
            }
            DataType::Uint128 => {
                let n = self.read_uint(cursor, size, 16, "uint128")?;
                Ok((DataValue::Uint128(n), cursor + size as u64))
            }
            DataType::Bool => match size {
                0 | 1 => Ok((DataValue::Bool(size == 1), cursor)),
                _ => Err(IpdbError::decode(format!(
                    "boolean with invalid size {}",
                    size
                ))),
            },
            DataType::Map => self.decode_map(size, cursor, depth),
            DataType::Array => self.decode_array(size, cursor, depth),
            DataType::Container | DataType::EndMarker | DataType::Pointer => Err(
                IpdbError::decode(format!("unexpected {:?} in data section", data_type)),
            ),
        }
    }

    fn decode_pointer(&self, ctrl: u8, cursor: u64, depth: usize) -> Result<(DataValue, u64)> {
        let size_class = usize::from((ctrl >> 3) & 0x3);
        let len = size_class + 1;
        let bytes = self.source.read(cursor, len)?;

        let mut raw = if size_class == 3 {
            0
        } else {
            u64::from(ctrl & 0x7)
        };
        for &b in bytes.iter() {
            raw = (raw << 8) | u64::from(b);
        }
        let target = self.pointer_base + raw + POINTER_BASES[size_class];

        let (value, _) = self.decode_at(target, depth + 1)?;
        Ok((value, cursor + len as u64))
    }

    fn decode_map(&self, count: usize, mut cursor: u64, depth: usize) -> Result<(DataValue, u64)> {
        // Every key and every value takes at least one byte
        self.check_count(count.saturating_mul(2), cursor, "map")?;

        let mut map = BTreeMap::new();
        for _ in 0..count {
            let (key, next) = self.decode_at(cursor, depth + 1)?;
            let key = match key {
                DataValue::String(s) => s,
                other => {
                    return Err(IpdbError::decode(format!(
                        "map key at offset {} is a {}, not a string",
                        cursor,
                        other.kind()
                    )))
                }
            };
            let (value, next) = self.decode_at(next, depth + 1)?;
            map.insert(key, value);
            cursor = next;
        }
        Ok((DataValue::Map(map), cursor))
    }

    fn decode_array(&self, count: usize, mut cursor: u64, depth: usize) -> Result<(DataValue, u64)> {
        self.check_count(count, cursor, "array")?;

        // The count is only bounded by the file size
        let mut array = Vec::with_capacity(count.min(MAX_PREALLOCATED_ELEMENTS));
        for _ in 0..count {
            let (value, next) = self.decode_at(cursor, depth + 1)?;
            array.push(value);
            cursor = next;
        }
        Ok((DataValue::Array(array), cursor))
    }

    /// Reject element counts that cannot possibly fit in the remaining bytes
    fn check_count(&self, min_bytes: usize, cursor: u64, what: &str) -> Result<()> {
        let remaining = self.source.size().saturating_sub(cursor);
        if min_bytes as u64 > remaining {
            return Err(IpdbError::decode(format!(
                "{} at offset {} declares more elements than the {} bytes remaining",
                what, cursor, remaining
            )));
        }
        Ok(())
    }

    fn decode_size(&self, size: u8, cursor: u64) -> Result<(usize, u64)> {
        let extra = match size {
            0..=28 => return Ok((usize::from(size), cursor)),
            29 => 1,
            30 => 2,
            _ => 3,
        };
        let bytes = self.source.read(cursor, extra)?;
        let n = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | usize::from(b));
        let base = match size {
            29 => 29,
            30 => 285,
            _ => 65_821,
        };
        Ok((base + n, cursor + extra as u64))
    }

    fn read_u8(&self, offset: u64) -> Result<u8> {
        Ok(self.source.read(offset, 1)?[0])
    }

    fn read_exact_size<const N: usize>(
        &self,
        cursor: u64,
        size: usize,
        what: &str,
    ) -> Result<[u8; N]> {
        if size != N {
            return Err(IpdbError::decode(format!(
                "{} must be {} bytes, found size {}",
                what, N, size
            )));
        }
        let bytes = self.source.read(cursor, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Big-endian unsigned integer of `size` bytes, zero-padded on the left
    fn read_uint(&self, cursor: u64, size: usize, max: usize, what: &str) -> Result<u128> {
        if size > max {
            return Err(IpdbError::decode(format!(
                "{} cannot be {} bytes (maximum {})",
                what, size, max
            )));
        }
        let bytes = self.source.read(cursor, size)?;
        Ok(bytes.iter().fold(0u128, |acc, &b| (acc << 8) | u128::from(b)))
    }
}
