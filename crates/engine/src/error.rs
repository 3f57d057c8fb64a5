//! Error types for the CaskKV engine.

use thiserror::Error;

/// The result type used throughout the engine.
pub type Result<T> = std::result::Result<T, Error>;

/// The closed set of failures store operations can surface.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested key is not present.
    #[error("key not found")]
    KeyNotFound,

    /// Another store instance holds the directory lock.
    #[error("store directory is locked by another instance")]
    AlreadyOpen,

    /// The store was opened read-only and a mutation was attempted.
    #[error("store was opened read-only")]
    ReadOnly,

    /// The store has been closed.
    #[error("store is closed")]
    Closed,

    /// Keys must be at least one byte.
    #[error("key must not be empty")]
    EmptyKey,

    /// The key exceeds the on-disk size field.
    #[error("key too large: {0} bytes (max {})", crate::MAX_KEY_SIZE)]
    KeyTooLarge(usize),

    /// The value exceeds the on-disk size field.
    #[error("value too large: {0} bytes (max {})", crate::MAX_VALUE_SIZE)]
    ValueTooLarge(usize),

    /// An option passed to `open` is out of range.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// Unrecoverable structural corruption: a sealed segment other than the
    /// newest one is damaged.
    #[error("corrupt store: segment {segment_id:016x} is damaged at offset {offset}")]
    CorruptStore { segment_id: u64, offset: u64 },

    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
