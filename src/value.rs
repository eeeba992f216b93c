//! Decoded data values
//!
//! Every record and the metadata block decode into a [`DataValue`] tree. Pointers
//! in the encoding are resolved while decoding, so a `DataValue` never refers back
//! into the file and owns all of its children.

use crate::error::{IpdbError, Result};
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;

/// A decoded value from the data section
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (string keys only)
    Map(BTreeMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Short name of the variant, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::Double(_) => "double",
            DataValue::Bytes(_) => "bytes",
            DataValue::Uint16(_) => "uint16",
            DataValue::Uint32(_) => "uint32",
            DataValue::Map(_) => "map",
            DataValue::Int32(_) => "int32",
            DataValue::Uint64(_) => "uint64",
            DataValue::Uint128(_) => "uint128",
            DataValue::Array(_) => "array",
            DataValue::Bool(_) => "boolean",
            DataValue::Float(_) => "float",
        }
    }

    fn mismatch(&self, expected: &'static str) -> IpdbError {
        IpdbError::TypeMismatch {
            expected,
            found: self.kind(),
        }
    }

    /// Borrow the string content
    pub fn as_str(&self) -> Result<&str> {
        match self {
            DataValue::String(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// Any unsigned integer that fits in a `u64`
    pub fn as_u64(&self) -> Result<u64> {
        match self {
            DataValue::Uint16(n) => Ok(u64::from(*n)),
            DataValue::Uint32(n) => Ok(u64::from(*n)),
            DataValue::Uint64(n) => Ok(*n),
            DataValue::Uint128(n) => u64::try_from(*n).map_err(|_| self.mismatch("uint64")),
            other => Err(other.mismatch("unsigned integer")),
        }
    }

    /// Any integer, signed or unsigned, widened to `i128`
    pub fn as_i128(&self) -> Result<i128> {
        match self {
            DataValue::Int32(n) => Ok(i128::from(*n)),
            DataValue::Uint128(n) => i128::try_from(*n).map_err(|_| self.mismatch("int128")),
            other => other.as_u64().map(i128::from).map_err(|_| other.mismatch("integer")),
        }
    }

    /// Either float width, widened to `f64`
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            DataValue::Double(d) => Ok(*d),
            DataValue::Float(f) => Ok(f64::from(*f)),
            other => Err(other.mismatch("double")),
        }
    }

    /// The boolean value
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            DataValue::Bool(b) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    /// Borrow the raw bytes
    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            DataValue::Bytes(b) => Ok(b),
            other => Err(other.mismatch("bytes")),
        }
    }

    /// Borrow the array elements
    pub fn as_array(&self) -> Result<&[DataValue]> {
        match self {
            DataValue::Array(a) => Ok(a),
            other => Err(other.mismatch("array")),
        }
    }

    /// Borrow the map entries
    pub fn as_map(&self) -> Result<&BTreeMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Ok(m),
            other => Err(other.mismatch("map")),
        }
    }

    /// Look up `key` in a map value. Returns `None` for non-maps and missing keys.
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        match self {
            DataValue::Map(m) => m.get(key),
            _ => None,
        }
    }

    /// Follow a path of map keys, e.g. `["country", "iso_code"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&DataValue> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }
}

impl Serialize for DataValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            DataValue::String(s) => serializer.serialize_str(s),
            DataValue::Double(d) => serializer.serialize_f64(*d),
            DataValue::Bytes(b) => {
                let mut seq = serializer.serialize_seq(Some(b.len()))?;
                for byte in b {
                    seq.serialize_element(byte)?;
                }
                seq.end()
            }
            DataValue::Uint16(n) => serializer.serialize_u16(*n),
            DataValue::Uint32(n) => serializer.serialize_u32(*n),
            DataValue::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            DataValue::Int32(n) => serializer.serialize_i32(*n),
            DataValue::Uint64(n) => serializer.serialize_u64(*n),
            DataValue::Uint128(n) => serializer.serialize_u128(*n),
            DataValue::Array(a) => {
                let mut seq = serializer.serialize_seq(Some(a.len()))?;
                for v in a {
                    seq.serialize_element(v)?;
                }
                seq.end()
            }
            DataValue::Bool(b) => serializer.serialize_bool(*b),
            DataValue::Float(f) => serializer.serialize_f32(*f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataValue {
        let mut country = BTreeMap::new();
        country.insert("iso_code".to_string(), DataValue::String("CN".to_string()));
        country.insert("geoname_id".to_string(), DataValue::Uint32(1814991));

        let mut root = BTreeMap::new();
        root.insert("country".to_string(), DataValue::Map(country));
        root.insert(
            "tags".to_string(),
            DataValue::Array(vec![DataValue::Bool(true), DataValue::Int32(-7)]),
        );
        DataValue::Map(root)
    }

    #[test]
    fn test_typed_accessors() {
        let value = sample();
        assert_eq!(
            value.get_path(&["country", "iso_code"]).unwrap().as_str().unwrap(),
            "CN"
        );
        assert_eq!(
            value.get_path(&["country", "geoname_id"]).unwrap().as_u64().unwrap(),
            1814991
        );
        let tags = value.get("tags").unwrap().as_array().unwrap();
        assert!(tags[0].as_bool().unwrap());
        assert_eq!(tags[1].as_i128().unwrap(), -7);
        assert!(value.get_path(&["country", "missing"]).is_none());
        assert!(value.get_path(&["tags", "0"]).is_none());
    }

    #[test]
    fn test_accessor_mismatch() {
        let value = DataValue::String("110000".to_string());
        assert_eq!(
            value.as_map().unwrap_err(),
            IpdbError::TypeMismatch {
                expected: "map",
                found: "string"
            }
        );
        assert!(value.as_u64().is_err());
        assert!(DataValue::Int32(-1).as_u64().is_err());
        assert!(DataValue::Uint128(u128::MAX).as_u64().is_err());
        assert_eq!(DataValue::Float(1.5).as_f64().unwrap(), 1.5);
    }

    #[test]
    fn test_serialize_json() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "country": {"geoname_id": 1814991, "iso_code": "CN"},
                "tags": [true, -7],
            })
        );

        let bytes = serde_json::to_string(&DataValue::Bytes(vec![1, 255])).unwrap();
        assert_eq!(bytes, "[1,255]");
    }
}
