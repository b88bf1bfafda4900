//! Error types for the mapped-file substrate.

use std::io;
use thiserror::Error;

/// Result type for substrate operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur while operating on a mapped table file.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Operation attempted on a closed file.
    #[error("file is not open")]
    NotOpen,

    /// Mutation attempted on a file opened read-only.
    #[error("file opened in read-only mode")]
    ReadOnly,

    /// A read or write fell outside the mapped region.
    #[error("access out of range: logical offset {offset}, len {len}, mapped {mapped}")]
    OutOfRange {
        /// Logical offset of the access (preamble excluded).
        offset: u64,
        /// Length of the access in bytes.
        len: usize,
        /// Current mapping size in bytes.
        mapped: u64,
    },

    /// Expansion failed and the requested bytes do not fit.
    #[error("capacity exhausted: need {need} bytes, used {used} of {mapped}")]
    CapacityExhausted {
        /// Additional bytes that were requested.
        need: u64,
        /// Logically occupied bytes (preamble inclusive).
        used: u64,
        /// Current mapping size in bytes.
        mapped: u64,
    },

    /// The file does not start with the expected magic string.
    #[error("invalid magic: not an ISCADB table file")]
    InvalidMagic,

    /// The preamble's used-size field is inconsistent with the file.
    #[error("invalid preamble: used size {used} outside [{min}, {mapped}]")]
    InvalidPreamble {
        /// The used size recorded in the preamble.
        used: u64,
        /// Minimum acceptable value (the preamble size).
        min: u64,
        /// Current mapping size in bytes.
        mapped: u64,
    },

    /// A size argument violated a bound.
    #[error("invalid size: {requested} below minimum {minimum}")]
    InvalidSize {
        /// The size that was requested.
        requested: u64,
        /// The smallest acceptable size.
        minimum: u64,
    },
}
