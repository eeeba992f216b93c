//! ipdb - Read-only IP Database Lookups
//!
//! ipdb answers "which record covers this address?" against databases in the
//! AWDB binary format: the MaxMind DB layout, closed by the 16-byte metadata
//! marker `\xAB\xCD\xEFipplus360.com`. Each lookup walks a binary search tree
//! keyed on the address bits and returns the record attached to the longest
//! matching prefix, along with the length of that prefix.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ipdb::{Database, OpenMode};
//!
//! let db = Database::open_with_mode("GeoLite2-City.mmdb", OpenMode::Mmap)?;
//!
//! if let Some(record) = db.get("8.8.8.8")? {
//!     let city = record.get_path(&["city", "names", "en"]);
//!     println!("city: {:?}", city);
//! }
//!
//! println!("built {:?}, {} nodes", db.metadata().build_epoch, db.metadata().node_count);
//! # Ok::<(), ipdb::IpdbError>(())
//! ```
//!
//! # File Layout
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  1. Search tree (node_count nodes)   │
//! │  2. 16-byte zero separator           │
//! │  3. Data section (typed values)      │
//! │  4. 16-byte metadata marker          │
//! │  5. Metadata map                     │
//! └──────────────────────────────────────┘
//! ```
//!
//! # Storage Backends
//!
//! Bytes are read through the [`ByteSource`] trait. [`OpenMode`] selects the
//! backend: a memory map (the default), a full in-memory copy, or positioned
//! reads on an open file handle. All of them give identical lookup results.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Unified database API
pub mod database;
/// Decoder for the typed data section
pub mod decoder;
/// Error types for database operations
pub mod error;
/// Metadata location and parsing
pub mod metadata;
/// Random-access byte sources
pub mod source;
/// Binary search tree traversal
pub mod tree;
/// Decoded data values
pub mod value;

// Re-exports for Rust consumers

pub use crate::database::{Database, Networks};
pub use crate::error::{IpdbError, Result};
pub use crate::metadata::{IpVersion, Metadata, RecordSize};
pub use crate::source::{ByteSource, FileSource, MemorySource, OpenMode};
pub use crate::value::DataValue;

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
        assert!(VERSION.starts_with("0."));
    }
}
