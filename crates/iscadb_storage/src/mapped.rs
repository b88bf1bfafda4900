//! Memory-mapped table file with auto-expansion.
//!
//! One [`MappedFile`] owns one table file and one mapping over it. The
//! file begins with a 1 KiB preamble:
//!
//! ```text
//! offset    0   25-byte magic "ISCADA Database File v1.0", zero padded
//! offset  256   used_size as little-endian u64 (preamble inclusive)
//! offset  264   reserved, zero
//! offset 1024   caller data (table header, then records)
//! ```
//!
//! Callers address data with *logical* offsets relative to the end of
//! the preamble. `used_size` counts every logically occupied byte
//! including the preamble itself; while the file is open the in-memory
//! value is authoritative and the on-disk copy is refreshed by
//! [`MappedFile::sync`] and [`MappedFile::close`].
//!
//! A background watchdog grows the mapping before appends run out of
//! room: it wakes every `check_interval` (or when an append pushes the
//! free ratio below `expand_threshold`) and expands to
//! `max(ceil(size * 1.25), size + 1 MiB)`. Growth truncates the file to
//! the new length and remaps; the mapping may move, which is safe
//! because no reference to mapped bytes ever escapes the state mutex.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use memmap2::{Mmap, MmapMut};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Size of the preamble preceding the data area.
pub const PREAMBLE_SIZE: usize = 1024;

/// Magic string at offset 0 of every table file.
pub const MAGIC: &[u8; 25] = b"ISCADA Database File v1.0";

/// Byte offset of the persisted `used_size` field within the preamble.
pub const USED_SIZE_OFFSET: usize = 256;

/// Default free-ratio threshold below which the watchdog expands.
pub const DEFAULT_EXPAND_THRESHOLD: f64 = 0.2;

/// Default watchdog wake interval.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Minimum growth step for one expansion (1 MiB).
const MIN_GROWTH: usize = 1 << 20;

/// How a table file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing file, reads only.
    ReadOnly,
    /// Existing file, reads and writes.
    ReadWrite,
    /// New file; truncates whatever was there.
    Create,
}

/// Tuning knobs for a [`MappedFile`].
#[derive(Debug, Clone)]
pub struct MappedFileOptions {
    /// Free ratio below which the watchdog expands the mapping.
    pub expand_threshold: f64,
    /// How long the watchdog sleeps between checks.
    pub check_interval: Duration,
}

impl Default for MappedFileOptions {
    fn default() -> Self {
        Self {
            expand_threshold: DEFAULT_EXPAND_THRESHOLD,
            check_interval: DEFAULT_CHECK_INTERVAL,
        }
    }
}

impl MappedFileOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expansion threshold.
    #[must_use]
    pub fn expand_threshold(mut self, ratio: f64) -> Self {
        self.expand_threshold = ratio;
        self
    }

    /// Sets the watchdog wake interval.
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

/// The mapping itself, writable or not depending on open mode.
enum Region {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Region {
    fn bytes(&self) -> &[u8] {
        match self {
            Region::ReadOnly(map) => map,
            Region::ReadWrite(map) => map,
        }
    }

    fn bytes_mut(&mut self) -> StorageResult<&mut [u8]> {
        match self {
            Region::ReadOnly(_) => Err(StorageError::ReadOnly),
            Region::ReadWrite(map) => Ok(&mut map[..]),
        }
    }

    fn flush(&self) -> StorageResult<()> {
        if let Region::ReadWrite(map) = self {
            map.flush()?;
        }
        Ok(())
    }
}

/// Open-file state; `None` once closed.
struct State {
    inner: Option<Inner>,
}

struct Inner {
    file: File,
    map: Region,
    /// Mapping (and file) length in bytes.
    size: usize,
    /// Logically occupied bytes, preamble inclusive.
    used_size: usize,
    mode: OpenMode,
    path: PathBuf,
}

struct Shared {
    state: Mutex<State>,
    watchdog_cv: Condvar,
    running: AtomicBool,
    expand_threshold: f64,
    check_interval: Duration,
}

/// A memory-mapped table file.
///
/// All public methods are safe under concurrent callers: reads and
/// writes serialize through one internal mutex, and `append` snapshots
/// and advances `used_size` under that same lock, so concurrent appends
/// never interleave.
pub struct MappedFile {
    shared: Arc<Shared>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl MappedFile {
    /// Creates a new table file, truncating any existing one.
    ///
    /// The file is truncated to `initial_size`, mapped read/write, the
    /// magic written, `used_size` set to [`PREAMBLE_SIZE`] and persisted,
    /// and the whole mapping synced to disk.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidSize`] if `initial_size` is below
    /// [`PREAMBLE_SIZE`], or an I/O error from create/truncate/map.
    pub fn create<P: AsRef<Path>>(path: P, initial_size: usize) -> StorageResult<Self> {
        Self::create_with(path, initial_size, MappedFileOptions::default())
    }

    /// Creates a new table file with explicit tuning options.
    ///
    /// # Errors
    ///
    /// Same as [`MappedFile::create`].
    pub fn create_with<P: AsRef<Path>>(
        path: P,
        initial_size: usize,
        options: MappedFileOptions,
    ) -> StorageResult<Self> {
        let path = path.as_ref();

        if initial_size < PREAMBLE_SIZE {
            return Err(StorageError::InvalidSize {
                requested: initial_size as u64,
                minimum: PREAMBLE_SIZE as u64,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(initial_size as u64)?;

        // SAFETY: the file was just created with exclusive write access
        // and truncated to `initial_size`; the mapping's lifetime is tied
        // to `Inner`, and every access is bounds-checked under the state
        // mutex.
        let mut map = unsafe { MmapMut::map_mut(&file)? };

        map[..MAGIC.len()].copy_from_slice(MAGIC);
        store_used_size(&mut map, PREAMBLE_SIZE as u64);
        map.flush()?;

        let inner = Inner {
            file,
            map: Region::ReadWrite(map),
            size: initial_size,
            used_size: PREAMBLE_SIZE,
            mode: OpenMode::Create,
            path: path.to_path_buf(),
        };

        let this = Self::from_inner(inner, options);
        this.start_watchdog()?;
        Ok(this)
    }

    /// Opens an existing table file.
    ///
    /// The magic must match byte-for-byte and the persisted `used_size`
    /// must lie within `[PREAMBLE_SIZE, file size]`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidMagic`] or
    /// [`StorageError::InvalidPreamble`] on format problems, an I/O
    /// error otherwise. Passing [`OpenMode::Create`] here is rejected;
    /// use [`MappedFile::create`], which takes the initial size.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> StorageResult<Self> {
        Self::open_with(path, mode, MappedFileOptions::default())
    }

    /// Opens an existing table file with explicit tuning options.
    ///
    /// # Errors
    ///
    /// Same as [`MappedFile::open`].
    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        options: MappedFileOptions,
    ) -> StorageResult<Self> {
        let path = path.as_ref();

        if mode == OpenMode::Create {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "Create mode requires an initial size; use MappedFile::create",
            )));
        }

        let writable = mode == OpenMode::ReadWrite;
        let file = OpenOptions::new().read(true).write(writable).open(path)?;
        let size = file.metadata()?.len() as usize;

        if size < PREAMBLE_SIZE {
            return Err(StorageError::InvalidMagic);
        }

        // SAFETY: the mapping's lifetime is tied to `Inner`; table files
        // are not modified by other processes while open here, and every
        // access is bounds-checked under the state mutex.
        let map = if writable {
            Region::ReadWrite(unsafe { MmapMut::map_mut(&file)? })
        } else {
            Region::ReadOnly(unsafe { Mmap::map(&file)? })
        };

        let bytes = map.bytes();
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(StorageError::InvalidMagic);
        }

        let mut used_le = [0u8; 8];
        used_le.copy_from_slice(&bytes[USED_SIZE_OFFSET..USED_SIZE_OFFSET + 8]);
        let used_size = u64::from_le_bytes(used_le) as usize;

        if used_size < PREAMBLE_SIZE || used_size > size {
            return Err(StorageError::InvalidPreamble {
                used: used_size as u64,
                min: PREAMBLE_SIZE as u64,
                mapped: size as u64,
            });
        }

        let inner = Inner {
            file,
            map,
            size,
            used_size,
            mode,
            path: path.to_path_buf(),
        };

        let this = Self::from_inner(inner, options);
        if writable {
            this.start_watchdog()?;
        }
        Ok(this)
    }

    fn from_inner(inner: Inner, options: MappedFileOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State { inner: Some(inner) }),
                watchdog_cv: Condvar::new(),
                running: AtomicBool::new(false),
                expand_threshold: options.expand_threshold,
                check_interval: options.check_interval,
            }),
            watchdog: Mutex::new(None),
        }
    }

    /// Appends `data` at the current logical end of the file.
    ///
    /// Expands the mapping synchronously if the bytes do not fit, then
    /// advances `used_size`. Signals the watchdog when the post-append
    /// free ratio falls below the expansion threshold.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadOnly`] in read-only mode,
    /// [`StorageError::NotOpen`] after close, or
    /// [`StorageError::CapacityExhausted`] if expansion fails.
    pub fn append(&self, data: &[u8]) -> StorageResult<()> {
        let mut state = self.shared.state.lock();
        let threshold = self.shared.expand_threshold;
        let inner = state.inner.as_mut().ok_or(StorageError::NotOpen)?;
        if inner.mode == OpenMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }

        if inner.used_size + data.len() > inner.size {
            inner.expand_to_fit(inner.used_size + data.len())?;
        }

        let offset = inner.used_size;
        inner.map.bytes_mut()?[offset..offset + data.len()].copy_from_slice(data);
        inner.used_size += data.len();

        let free_ratio = 1.0 - inner.used_size as f64 / inner.size as f64;
        if free_ratio < threshold {
            self.shared.watchdog_cv.notify_one();
        }
        Ok(())
    }

    /// Writes `data` at a fixed logical offset without touching `used_size`.
    ///
    /// The target range must lie entirely within the mapping. Used for
    /// in-place record updates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] if the range exceeds the
    /// mapping, [`StorageError::ReadOnly`] or [`StorageError::NotOpen`]
    /// as appropriate.
    pub fn write_at(&self, data: &[u8], logical_offset: usize) -> StorageResult<()> {
        let mut state = self.shared.state.lock();
        let inner = state.inner.as_mut().ok_or(StorageError::NotOpen)?;
        if inner.mode == OpenMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }

        let actual = logical_offset + PREAMBLE_SIZE;
        if actual + data.len() > inner.size {
            return Err(StorageError::OutOfRange {
                offset: logical_offset as u64,
                len: data.len(),
                mapped: inner.size as u64,
            });
        }
        inner.map.bytes_mut()?[actual..actual + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Reads `len` bytes starting at a logical offset.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] if the range exceeds the
    /// mapping, or [`StorageError::NotOpen`] after close.
    pub fn read_at(&self, logical_offset: usize, len: usize) -> StorageResult<Vec<u8>> {
        let state = self.shared.state.lock();
        let inner = state.inner.as_ref().ok_or(StorageError::NotOpen)?;

        let actual = logical_offset + PREAMBLE_SIZE;
        if actual + len > inner.size {
            return Err(StorageError::OutOfRange {
                offset: logical_offset as u64,
                len,
                mapped: inner.size as u64,
            });
        }
        Ok(inner.map.bytes()[actual..actual + len].to_vec())
    }

    /// Ensures `need` more bytes can be appended, expanding if necessary.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CapacityExhausted`] if expansion cannot
    /// satisfy the request, [`StorageError::ReadOnly`] or
    /// [`StorageError::NotOpen`] as appropriate.
    pub fn ensure_capacity(&self, need: usize) -> StorageResult<()> {
        let mut state = self.shared.state.lock();
        let inner = state.inner.as_mut().ok_or(StorageError::NotOpen)?;
        if inner.mode == OpenMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        if inner.used_size + need <= inner.size {
            return Ok(());
        }
        inner.expand_to_fit(inner.used_size + need)
    }

    /// Sets the logical `used_size` directly.
    ///
    /// Low-level hook for schema migration, which rewrites the data area
    /// wholesale and then declares the new occupancy. The value must lie
    /// within `[PREAMBLE_SIZE, mapping size]`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::OutOfRange`] for values outside that
    /// range, [`StorageError::ReadOnly`] or [`StorageError::NotOpen`]
    /// as appropriate.
    pub fn set_used_size(&self, new_used: usize) -> StorageResult<()> {
        let mut state = self.shared.state.lock();
        let inner = state.inner.as_mut().ok_or(StorageError::NotOpen)?;
        if inner.mode == OpenMode::ReadOnly {
            return Err(StorageError::ReadOnly);
        }
        if new_used < PREAMBLE_SIZE || new_used > inner.size {
            return Err(StorageError::OutOfRange {
                offset: new_used as u64,
                len: 0,
                mapped: inner.size as u64,
            });
        }
        inner.used_size = new_used;
        Ok(())
    }

    /// Persists `used_size` into the preamble and syncs the mapping.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails, or
    /// [`StorageError::NotOpen`] after close. A no-op in read-only mode.
    pub fn sync(&self) -> StorageResult<()> {
        let mut state = self.shared.state.lock();
        let inner = state.inner.as_mut().ok_or(StorageError::NotOpen)?;
        if inner.mode != OpenMode::ReadOnly {
            let used = inner.used_size as u64;
            if let Region::ReadWrite(map) = &mut inner.map {
                store_used_size(map, used);
            }
            inner.map.flush()?;
        }
        Ok(())
    }

    /// Closes the file: stops the watchdog, persists `used_size`,
    /// syncs, unmaps and closes the descriptor. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the final sync fails; the file is closed
    /// regardless.
    pub fn close(&self) -> StorageResult<()> {
        self.stop_watchdog();

        let mut state = self.shared.state.lock();
        let Some(mut inner) = state.inner.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        if inner.mode != OpenMode::ReadOnly {
            let used = inner.used_size as u64;
            if let Region::ReadWrite(map) = &mut inner.map {
                store_used_size(map, used);
            }
            result = inner.map.flush();
        }
        // Dropping `inner` unmaps the region and closes the descriptor.
        drop(inner);
        result
    }

    /// Returns whether the file is open.
    pub fn is_open(&self) -> bool {
        self.shared.state.lock().inner.is_some()
    }

    /// Returns the current mapping size in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] after close.
    pub fn size(&self) -> StorageResult<usize> {
        let state = self.shared.state.lock();
        state
            .inner
            .as_ref()
            .map(|inner| inner.size)
            .ok_or(StorageError::NotOpen)
    }

    /// Returns the logical `used_size` (preamble inclusive).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] after close.
    pub fn used_size(&self) -> StorageResult<usize> {
        let state = self.shared.state.lock();
        state
            .inner
            .as_ref()
            .map(|inner| inner.used_size)
            .ok_or(StorageError::NotOpen)
    }

    /// Returns the open mode.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] after close.
    pub fn mode(&self) -> StorageResult<OpenMode> {
        let state = self.shared.state.lock();
        state
            .inner
            .as_ref()
            .map(|inner| inner.mode)
            .ok_or(StorageError::NotOpen)
    }

    /// Returns the path this file was opened from.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotOpen`] after close.
    pub fn path(&self) -> StorageResult<PathBuf> {
        let state = self.shared.state.lock();
        state
            .inner
            .as_ref()
            .map(|inner| inner.path.clone())
            .ok_or(StorageError::NotOpen)
    }

    fn start_watchdog(&self) -> StorageResult<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("iscadb-watchdog".into())
            .spawn(move || watchdog_loop(&shared))?;
        *self.watchdog.lock() = Some(handle);
        Ok(())
    }

    fn stop_watchdog(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.watchdog_cv.notify_all();
        if let Some(handle) = self.watchdog.lock().take() {
            if handle.thread().id() == thread::current().id() {
                // Joining ourselves would deadlock; let the thread wind
                // down on its own.
                drop(handle);
            } else if let Err(err) = handle.join() {
                warn!("watchdog thread panicked: {err:?}");
            }
        }
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("error while closing mapped file: {err}");
        }
    }
}

impl std::fmt::Debug for MappedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        match state.inner.as_ref() {
            Some(inner) => f
                .debug_struct("MappedFile")
                .field("path", &inner.path)
                .field("mode", &inner.mode)
                .field("size", &inner.size)
                .field("used_size", &inner.used_size)
                .finish(),
            None => f.debug_struct("MappedFile").field("open", &false).finish(),
        }
    }
}

fn watchdog_loop(shared: &Shared) {
    let mut state: MutexGuard<'_, State> = shared.state.lock();
    while shared.running.load(Ordering::Acquire) {
        let _ = shared
            .watchdog_cv
            .wait_for(&mut state, shared.check_interval);
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        if let Some(inner) = state.inner.as_mut() {
            if let Err(err) = inner.expand_if_needed(shared.expand_threshold) {
                warn!("watchdog expansion failed: {err}");
            }
        }
    }
}

impl Inner {
    /// Expands once if the free ratio is below `threshold`.
    fn expand_if_needed(&mut self, threshold: f64) -> StorageResult<()> {
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }
        let free_ratio = 1.0 - self.used_size as f64 / self.size as f64;
        if free_ratio < threshold {
            self.expand_step()?;
        }
        Ok(())
    }

    /// Expands repeatedly until the mapping holds `required` bytes.
    fn expand_to_fit(&mut self, required: usize) -> StorageResult<()> {
        while self.size < required {
            self.expand_step().map_err(|err| match err {
                StorageError::Io(_) => StorageError::CapacityExhausted {
                    need: (required - self.size) as u64,
                    used: self.used_size as u64,
                    mapped: self.size as u64,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    /// One expansion: `new = max(ceil(size * 1.25), size + 1 MiB)`.
    ///
    /// On remap failure the file is truncated back to its old length so
    /// mapping state stays consistent.
    fn expand_step(&mut self) -> StorageResult<()> {
        let old_size = self.size;
        let new_size = (old_size + old_size.div_ceil(4)).max(old_size + MIN_GROWTH);

        self.map.flush()?;
        self.file.set_len(new_size as u64)?;

        // SAFETY: the old mapping is replaced below and no reference to
        // it can exist, since we hold `&mut self` behind the state
        // mutex; the file has already been extended to `new_size`.
        match unsafe { MmapMut::map_mut(&self.file) } {
            Ok(map) => {
                self.map = Region::ReadWrite(map);
                self.size = new_size;
                debug!(
                    path = %self.path.display(),
                    new_size,
                    "expanded mapping"
                );
                Ok(())
            }
            Err(err) => {
                warn!(path = %self.path.display(), "remap failed: {err}");
                self.file.set_len(old_size as u64)?;
                Err(StorageError::Io(err))
            }
        }
    }
}

fn store_used_size(map: &mut MmapMut, used: u64) {
    map[USED_SIZE_OFFSET..USED_SIZE_OFFSET + 8].copy_from_slice(&used.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn create_writes_preamble() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, PREAMBLE_SIZE).unwrap();
        assert!(file.is_open());
        assert_eq!(file.used_size().unwrap(), PREAMBLE_SIZE);
        assert_eq!(file.size().unwrap(), PREAMBLE_SIZE);
        file.close().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..MAGIC.len()], MAGIC);
        let mut used = [0u8; 8];
        used.copy_from_slice(&raw[USED_SIZE_OFFSET..USED_SIZE_OFFSET + 8]);
        assert_eq!(u64::from_le_bytes(used), PREAMBLE_SIZE as u64);
    }

    #[test]
    fn create_rejects_small_initial_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let result = MappedFile::create(&path, PREAMBLE_SIZE - 1);
        assert!(matches!(result, Err(StorageError::InvalidSize { .. })));
    }

    #[test]
    fn open_rejects_bad_magic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&vec![0u8; 4096]).unwrap();
        drop(f);

        let result = MappedFile::open(&path, OpenMode::ReadWrite);
        assert!(matches!(result, Err(StorageError::InvalidMagic)));
    }

    #[test]
    fn open_rejects_bad_used_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, PREAMBLE_SIZE).unwrap();
        file.close().unwrap();

        // Corrupt the persisted used_size beyond the file length.
        let mut raw = std::fs::read(&path).unwrap();
        raw[USED_SIZE_OFFSET..USED_SIZE_OFFSET + 8]
            .copy_from_slice(&(u64::MAX).to_le_bytes());
        std::fs::write(&path, &raw).unwrap();

        let result = MappedFile::open(&path, OpenMode::ReadWrite);
        assert!(matches!(result, Err(StorageError::InvalidPreamble { .. })));
    }

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, 1024 * 1024).unwrap();
        file.append(b"hello").unwrap();
        file.append(b" world").unwrap();
        assert_eq!(file.used_size().unwrap(), PREAMBLE_SIZE + 11);

        let bytes = file.read_at(0, 11).unwrap();
        assert_eq!(&bytes, b"hello world");
        let tail = file.read_at(6, 5).unwrap();
        assert_eq!(&tail, b"world");
    }

    #[test]
    fn write_at_does_not_advance_used_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, 1024 * 1024).unwrap();
        file.append(b"aaaaaaaa").unwrap();
        let used = file.used_size().unwrap();

        file.write_at(b"bbbb", 2).unwrap();
        assert_eq!(file.used_size().unwrap(), used);
        assert_eq!(&file.read_at(0, 8).unwrap(), b"aabbbbaa");
    }

    #[test]
    fn read_out_of_range_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, PREAMBLE_SIZE).unwrap();
        let result = file.read_at(0, 1);
        assert!(matches!(result, Err(StorageError::OutOfRange { .. })));
    }

    #[test]
    fn readonly_rejects_mutation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        MappedFile::create(&path, PREAMBLE_SIZE).unwrap().close().unwrap();

        let file = MappedFile::open(&path, OpenMode::ReadOnly).unwrap();
        assert!(matches!(file.append(b"x"), Err(StorageError::ReadOnly)));
        assert!(matches!(
            file.write_at(b"x", 0),
            Err(StorageError::ReadOnly)
        ));
        assert!(matches!(
            file.ensure_capacity(1),
            Err(StorageError::ReadOnly)
        ));
    }

    #[test]
    fn used_size_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        {
            let file = MappedFile::create(&path, 1024 * 1024).unwrap();
            file.append(b"persistent payload").unwrap();
            file.close().unwrap();
        }

        let file = MappedFile::open(&path, OpenMode::ReadWrite).unwrap();
        assert_eq!(file.used_size().unwrap(), PREAMBLE_SIZE + 18);
        assert_eq!(&file.read_at(0, 18).unwrap(), b"persistent payload");
    }

    #[test]
    fn append_expands_past_initial_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, PREAMBLE_SIZE).unwrap();
        let chunk = vec![0xAB; 64 * 1024];
        for _ in 0..4 {
            file.append(&chunk).unwrap();
        }
        assert!(file.size().unwrap() > PREAMBLE_SIZE);
        assert_eq!(file.used_size().unwrap(), PREAMBLE_SIZE + 4 * 64 * 1024);

        let back = file.read_at(3 * 64 * 1024, 64 * 1024).unwrap();
        assert_eq!(back, chunk);
    }

    #[test]
    fn ensure_capacity_grows_to_fit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, PREAMBLE_SIZE).unwrap();
        file.ensure_capacity(8 * 1024 * 1024).unwrap();
        assert!(file.size().unwrap() >= PREAMBLE_SIZE + 8 * 1024 * 1024);
    }

    #[test]
    fn set_used_size_bounds() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, 4096).unwrap();
        file.set_used_size(2048).unwrap();
        assert_eq!(file.used_size().unwrap(), 2048);

        assert!(matches!(
            file.set_used_size(PREAMBLE_SIZE - 1),
            Err(StorageError::OutOfRange { .. })
        ));
        assert!(matches!(
            file.set_used_size(4097),
            Err(StorageError::OutOfRange { .. })
        ));
    }

    #[test]
    fn close_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = MappedFile::create(&path, PREAMBLE_SIZE).unwrap();
        file.close().unwrap();
        file.close().unwrap();
        assert!(!file.is_open());
        assert!(matches!(file.append(b"x"), Err(StorageError::NotOpen)));
    }

    #[test]
    fn watchdog_expands_under_pressure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let options = MappedFileOptions::new()
            .expand_threshold(0.5)
            .check_interval(Duration::from_millis(20));
        let file = MappedFile::create_with(&path, PREAMBLE_SIZE * 2, options).unwrap();

        // Push occupancy above half the mapping and give the watchdog a
        // few cycles to react.
        file.append(&vec![1u8; PREAMBLE_SIZE / 2]).unwrap();
        std::thread::sleep(Duration::from_millis(200));

        assert!(file.size().unwrap() > PREAMBLE_SIZE * 2);
    }

    #[test]
    fn concurrent_appends_do_not_interleave() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("table.dat");

        let file = std::sync::Arc::new(MappedFile::create(&path, 1024 * 1024).unwrap());
        let mut handles = Vec::new();
        for worker in 0..4u8 {
            let file = std::sync::Arc::clone(&file);
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    file.append(&[worker; 16]).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(file.used_size().unwrap(), PREAMBLE_SIZE + 200 * 16);
        // Every 16-byte slot must be a single worker's fill byte.
        for slot in 0..200 {
            let bytes = file.read_at(slot * 16, 16).unwrap();
            assert!(bytes.iter().all(|b| *b == bytes[0]));
        }
    }
}
