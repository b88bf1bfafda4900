//! Error types for ISCADB core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in ISCADB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Substrate error (not open, read-only, out of range, capacity,
    /// magic, I/O).
    #[error("storage error: {0}")]
    Storage(#[from] iscadb_storage::StorageError),

    /// I/O error outside the substrate (backup, config files).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The on-disk header is malformed.
    #[error("invalid header: {message}")]
    InvalidHeader {
        /// Description of the problem.
        message: String,
    },

    /// The on-disk field list disagrees with the configured one.
    #[error("schema mismatch for table '{table}': {message}")]
    SchemaMismatch {
        /// Table alias being loaded.
        table: String,
        /// Description of the disagreement.
        message: String,
    },

    /// A field definition or supplied value violates its invariants.
    #[error("invalid field '{name}': {message}")]
    InvalidField {
        /// Field name.
        name: String,
        /// Description of the violation.
        message: String,
    },

    /// A record index at or past the current record count.
    #[error("record index {index} out of range (count {count})")]
    IndexOutOfRange {
        /// The requested record index.
        index: usize,
        /// The record count at the time of the access.
        count: usize,
    },

    /// A table lock could not be acquired within the bound.
    #[error("{which} lock acquisition timed out after {seconds}s")]
    LockTimeout {
        /// Which lock: "data" or "meta".
        which: &'static str,
        /// The timeout bound in seconds.
        seconds: u64,
    },

    /// The cipher produced an unexpected byte count.
    #[error("crypto error: expected {expected} output bytes, got {actual}")]
    CryptoError {
        /// Bytes expected (the slot length).
        expected: usize,
        /// Bytes produced.
        actual: usize,
    },

    /// Read-back after an in-place write did not match what was written.
    #[error("write verification failed at record {index}")]
    WriteVerification {
        /// The record index that failed verification.
        index: usize,
    },

    /// Configuration document problem.
    #[error("config error: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates an invalid header error.
    pub fn invalid_header(message: impl Into<String>) -> Self {
        Self::InvalidHeader {
            message: message.into(),
        }
    }

    /// Creates a schema mismatch error.
    pub fn schema_mismatch(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid field error.
    pub fn invalid_field(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidField {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
