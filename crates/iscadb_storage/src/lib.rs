//! # ISCADB Storage
//!
//! Memory-mapped file substrate for ISCADB table files.
//!
//! This crate owns the lowest layer of an ISCADB table: one file, one
//! mapping, a self-describing preamble, and a background watchdog that
//! grows the mapping before appends run out of room. It knows nothing
//! about table headers or records - higher layers interpret the bytes.
//!
//! ## Design Principles
//!
//! - One mutex serializes every mutation of mapping state
//! - Logical offsets are relative to the end of the 1 KiB preamble
//! - `used_size` (preamble inclusive) is authoritative in memory while
//!   open and persisted into the preamble on sync/close
//! - Growth may move the mapping; no references to mapped bytes escape
//!   the lock
//!
//! ## Example
//!
//! ```no_run
//! use iscadb_storage::MappedFile;
//!
//! let file = MappedFile::create("table.dat", 1024 * 1024)?;
//! file.append(b"payload")?;
//! let bytes = file.read_at(0, 7)?;
//! assert_eq!(&bytes, b"payload");
//! file.close()?;
//! # Ok::<(), iscadb_storage::StorageError>(())
//! ```

#![warn(missing_docs)]

mod error;
mod mapped;

pub use error::{StorageError, StorageResult};
pub use mapped::{
    MappedFile, MappedFileOptions, OpenMode, DEFAULT_CHECK_INTERVAL, DEFAULT_EXPAND_THRESHOLD,
    MAGIC, PREAMBLE_SIZE, USED_SIZE_OFFSET,
};
