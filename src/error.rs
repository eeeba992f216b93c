/// Error types for the ipdb library
use std::fmt;

/// Result type alias for database operations
pub type Result<T> = std::result::Result<T, IpdbError>;

/// Main error type for database operations
///
/// Every failure aborts the current operation. Nothing is retried: the
/// underlying file is static, so a malformed read cannot succeed later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpdbError {
    /// Caller misuse: bad IP literal, or an IPv6 query against an IPv4-only database
    InvalidArgument(String),

    /// Corrupt or malformed database file (includes data decoding failures)
    InvalidDatabase(String),

    /// I/O errors while opening or mapping the file
    Io(String),

    /// A decoded value was not of the requested kind
    TypeMismatch {
        /// Kind the caller asked for
        expected: &'static str,
        /// Kind actually present
        found: &'static str,
    },

    /// The byte source was read after being closed
    Closed,
}

impl IpdbError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        IpdbError::InvalidDatabase(msg.into())
    }

    pub(crate) fn decode(msg: impl fmt::Display) -> Self {
        IpdbError::InvalidDatabase(format!("decoding error: {}", msg))
    }
}

impl fmt::Display for IpdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpdbError::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            IpdbError::InvalidDatabase(msg) => write!(f, "Invalid database: {}", msg),
            IpdbError::Io(msg) => write!(f, "I/O error: {}", msg),
            IpdbError::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            IpdbError::Closed => write!(f, "Database has been closed"),
        }
    }
}

impl std::error::Error for IpdbError {}

impl From<std::io::Error> for IpdbError {
    fn from(err: std::io::Error) -> Self {
        IpdbError::Io(err.to_string())
    }
}
