//! Error types for the mapkv storage engine.

use std::io;
use thiserror::Error;

/// The result type used throughout mapkv.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for mapkv operations.
///
/// A missing key is not an error: lookups return `Ok(None)`. Every variant
/// here either rejects input before any state is touched or reports a storage
/// fault that aborted the operation.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred while creating, resizing or mapping a file.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// On-disk state is inconsistent (header, metadata, manifest or a value
    /// location that points outside its segment).
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// The database directory does not exist and may not be created.
    #[error("Not found: {0}")]
    NotFound(String),

    /// An invalid argument or option was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The key does not fit in an index node.
    #[error("Key too long: {len} bytes (max {max})")]
    KeyTooLong {
        /// Length of the rejected key.
        len: usize,
        /// Largest accepted key length.
        max: usize,
    },

    /// The value cannot be described by a location's length field or does
    /// not fit in one segment.
    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge {
        /// Length of the rejected value.
        len: usize,
        /// Largest accepted value length.
        max: usize,
    },

    /// A configured capacity limit was reached.
    #[error("Storage full: {0}")]
    StorageFull(String),

    /// The database already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new storage full error.
    pub fn storage_full(msg: impl Into<String>) -> Self {
        Error::StorageFull(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Corruption(format!("manifest: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("bad header");
        assert_eq!(err.to_string(), "Data corruption: bad header");

        let err = Error::KeyTooLong { len: 2000, max: 1024 };
        assert!(err.to_string().contains("2000"));
        assert!(err.to_string().contains("1024"));

        let err = Error::ValueTooLarge { len: 70000, max: 65535 };
        assert_eq!(err.to_string(), "Value too large: 70000 bytes (max 65535)");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
