//! Error types for the caskdb core engine.

use thiserror::Error;

/// Result type for engine operations.
pub type CaskResult<T> = Result<T, CaskError>;

/// Errors that can occur in the storage engine.
#[derive(Debug, Error)]
pub enum CaskError {
    /// I/O error from the underlying filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The registry file contains malformed JSON.
    #[error("registry JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A record's stored CRC disagreed with the recomputed CRC.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    BadChecksum {
        /// CRC stored in the record.
        expected: u32,
        /// CRC recomputed from the record bytes.
        actual: u32,
    },

    /// Key or value bytes failed UTF-8 decoding.
    #[error("bad encoding: {message}")]
    BadEncoding {
        /// Description of the decoding failure.
        message: String,
    },

    /// The decoded key at the KeyDir-pointed offset differed from the
    /// requested key.
    #[error("index mismatch: expected key {expected:?}, found {found:?}")]
    IndexMismatch {
        /// Key that was looked up.
        expected: String,
        /// Key actually found on disk at the recorded offset.
        found: String,
    },

    /// A negative size was passed to the encoder.
    #[error("size violation: {message}")]
    SizeViolation {
        /// Description of the invalid size.
        message: String,
    },

    /// The registry file is unreadable or malformed, or a newly allocated
    /// segment name collides with an existing file.
    #[error("registry corrupt: {message}")]
    RegistryCorrupt {
        /// Description of the corruption.
        message: String,
    },

    /// A requested segment handle is not in the handle table.
    #[error("segment {segment_id} is not open")]
    NotOpen {
        /// The segment id that was requested.
        segment_id: u64,
    },

    /// Another process already holds the exclusive lock on this store.
    #[error("store already locked by another process")]
    AlreadyLocked,

    /// An operation was attempted after the engine was closed.
    #[error("engine is closed")]
    EngineClosed,
}

impl CaskError {
    /// Creates a bad-encoding error.
    pub fn bad_encoding(message: impl Into<String>) -> Self {
        Self::BadEncoding {
            message: message.into(),
        }
    }

    /// Creates a size-violation error.
    pub fn size_violation(message: impl Into<String>) -> Self {
        Self::SizeViolation {
            message: message.into(),
        }
    }

    /// Creates a registry-corrupt error.
    pub fn registry_corrupt(message: impl Into<String>) -> Self {
        Self::RegistryCorrupt {
            message: message.into(),
        }
    }
}
