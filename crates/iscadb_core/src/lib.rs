//! # ISCADB Core
//!
//! Schema-driven fixed-width record store over a memory-mapped file,
//! with asynchronous task dispatch, in-place field-level crypto and
//! online snapshot backup.
//!
//! The crate provides:
//! - [`Table`] - typed fixed-width records over the mapped substrate,
//!   with online schema extension
//! - [`TableManager`] - asynchronous read/write/crypto/backup/schema
//!   tasks with completion callbacks
//! - [`Initializer`] - load-or-create of configured tables with schema
//!   validation
//! - [`RecordCipher`] - length-preserving AES-128-CTR over record slots
//! - [`Archiver`] - the black-box compression boundary used by backups
//!
//! ## Example
//!
//! ```no_run
//! use iscadb_core::{FieldDef, ManagerConfig, Table, TableManager};
//! use std::sync::Arc;
//!
//! let table = Arc::new(Table::create(
//!     "students.dat",
//!     vec![
//!         FieldDef::int32("id"),
//!         FieldDef::text("name", 128),
//!         FieldDef::float32("score"),
//!     ],
//! )?);
//!
//! let manager = TableManager::new(Arc::clone(&table), ManagerConfig::new());
//! manager.submit_write(1, "alice", 95.5, |ok, id| {
//!     println!("write {id}: {ok}");
//! });
//! manager.wait_for_all();
//! # Ok::<(), iscadb_core::CoreError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backup;
mod config;
mod crypto;
mod dispatch;
mod error;
mod field;
mod header;
mod init;
mod table;
mod value;

pub use backup::{backup_file_name, Archiver, ZstdArchiver};
pub use config::{DatabaseConfig, FieldSpec, TableSpec};
pub use crypto::{RecordCipher, DEFAULT_KEY, KEY_LEN};
pub use dispatch::{
    Completion, CompletionQueue, CompletionSink, CryptoOp, ManagerConfig, PendingGuard,
    PendingTasks, TableManager, WorkerPool,
};
pub use error::{CoreError, CoreResult};
pub use field::{FieldDef, FieldType, FIXED_STRING_LEN, NUMERIC_LEN};
pub use header::TableHeader;
pub use init::Initializer;
pub use table::{Table, TableLockGuard, LOCK_TIMEOUT};
pub use value::{DataValue, FixedText, Record};
