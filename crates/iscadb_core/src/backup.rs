//! Snapshot backup boundary.
//!
//! The core treats compression as a black box: a backup task hands the
//! archiver a source file and a destination path and never interprets
//! the archive format. [`ZstdArchiver`] is the shipped implementation.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::info;

use crate::error::{CoreError, CoreResult};

/// Compresses one file into an archive at a caller-chosen path.
pub trait Archiver: Send + Sync {
    /// Compresses `src` into `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or the archive
    /// cannot be written.
    fn compress_file(&self, src: &Path, dest: &Path) -> CoreResult<()>;
}

/// Zstandard file compressor.
#[derive(Debug, Clone)]
pub struct ZstdArchiver {
    level: i32,
}

impl ZstdArchiver {
    /// Creates an archiver with an explicit compression level.
    #[must_use]
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdArchiver {
    fn default() -> Self {
        Self {
            level: zstd::DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl Archiver for ZstdArchiver {
    fn compress_file(&self, src: &Path, dest: &Path) -> CoreResult<()> {
        if !src.is_file() {
            return Err(CoreError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("backup source is not a file: {}", src.display()),
            )));
        }

        let input = BufReader::new(File::open(src)?);
        let output = File::create(dest)?;
        zstd::stream::copy_encode(input, output, self.level)?;

        info!(
            src = %src.display(),
            dest = %dest.display(),
            "snapshot archived"
        );
        Ok(())
    }
}

/// Derives a timestamped archive name, e.g. `tables_1722600000.zst`.
#[must_use]
pub fn backup_file_name(prefix: &str) -> String {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    format!("{prefix}_{seconds}.zst")
}
