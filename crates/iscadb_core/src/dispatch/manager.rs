//! Asynchronous task dispatch over one table.
//!
//! Callers submit read/write/crypto/backup/schema-change requests and
//! receive a completion callback with a success flag. Tasks execute on
//! a bounded worker pool; each acquires the table's data or meta lock
//! (5 s bound) for its critical section and reports failure instead of
//! blocking indefinitely. Completions are routed through the configured
//! [`CompletionSink`], never left unfired.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::backup::{Archiver, ZstdArchiver};
use crate::crypto::{RecordCipher, DEFAULT_KEY, KEY_LEN};
use crate::dispatch::completion::CompletionSink;
use crate::dispatch::pending::PendingTasks;
use crate::dispatch::pool::WorkerPool;
use crate::error::{CoreError, CoreResult};
use crate::field::{FieldDef, FieldType, FIXED_STRING_LEN};
use crate::table::Table;
use crate::value::{DataValue, Record};

/// Direction of a crypto pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoOp {
    /// Plaintext to ciphertext.
    Encrypt,
    /// Ciphertext to plaintext.
    Decrypt,
}

/// Configuration for a [`TableManager`].
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Requested worker count; clamped to hardware parallelism.
    pub worker_threads: usize,
    /// AES-128 key for crypto tasks.
    pub aes_key: [u8; KEY_LEN],
    /// The text field crypto tasks transform.
    pub crypto_field: String,
    /// Where completions run.
    pub completions: CompletionSink,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            aes_key: DEFAULT_KEY,
            crypto_field: "name".into(),
            completions: CompletionSink::inline(),
        }
    }
}

impl ManagerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the requested worker count.
    #[must_use]
    pub fn worker_threads(mut self, count: usize) -> Self {
        self.worker_threads = count;
        self
    }

    /// Sets the AES key.
    #[must_use]
    pub fn aes_key(mut self, key: [u8; KEY_LEN]) -> Self {
        self.aes_key = key;
        self
    }

    /// Sets the field crypto tasks operate on.
    #[must_use]
    pub fn crypto_field(mut self, name: impl Into<String>) -> Self {
        self.crypto_field = name.into();
        self
    }

    /// Sets the completion dispatch context.
    #[must_use]
    pub fn completions(mut self, sink: CompletionSink) -> Self {
        self.completions = sink;
        self
    }
}

/// Dispatches asynchronous tasks over one open table.
pub struct TableManager {
    table: Arc<Table>,
    pool: WorkerPool,
    pending: Arc<PendingTasks>,
    completions: CompletionSink,
    cipher: RecordCipher,
    crypto_field: String,
    archiver: Arc<dyn Archiver>,
}

impl TableManager {
    /// Creates a manager over `table` with the default zstd archiver.
    #[must_use]
    pub fn new(table: Arc<Table>, config: ManagerConfig) -> Self {
        Self::with_archiver(table, config, Arc::new(ZstdArchiver::default()))
    }

    /// Creates a manager with an explicit archiver implementation.
    #[must_use]
    pub fn with_archiver(
        table: Arc<Table>,
        config: ManagerConfig,
        archiver: Arc<dyn Archiver>,
    ) -> Self {
        Self {
            table,
            pool: WorkerPool::new(config.worker_threads),
            pending: PendingTasks::new(),
            completions: config.completions,
            cipher: RecordCipher::new(config.aes_key),
            crypto_field: config.crypto_field,
            archiver,
        }
    }

    /// The managed table.
    #[must_use]
    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Number of records currently stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the table file is closed.
    pub fn record_count(&self) -> CoreResult<usize> {
        self.table.record_count()
    }

    /// Blocks until every submitted task has completed.
    pub fn wait_for_all(&self) {
        self.pending.wait_idle();
    }

    /// Submits a record read. The callback receives the record, empty
    /// on failure.
    pub fn submit_read(&self, index: usize, callback: impl FnOnce(bool, Record) + Send + 'static) {
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let pending = self.pending.begin();

        self.pool.execute(move || {
            let _pending = pending;
            let (ok, record) = match read_task(&table, index) {
                Ok(record) => (true, record),
                Err(err) => {
                    warn!(index, "read task failed: {err}");
                    (false, Record::new())
                }
            };
            debug!(index, ok, "read task finished");
            completions.post(move || callback(ok, record));
        });
    }

    /// Submits an append of the default `{id, name, score}` row.
    pub fn submit_write(
        &self,
        id: i32,
        name: impl Into<String>,
        score: f32,
        callback: impl FnOnce(bool, i32) + Send + 'static,
    ) {
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let pending = self.pending.begin();
        let name = name.into();

        self.pool.execute(move || {
            let _pending = pending;
            let ok = match write_task(&table, id, &name, score) {
                Ok(()) => true,
                Err(err) => {
                    warn!(id, "write task failed: {err}");
                    false
                }
            };
            debug!(id, ok, "write task finished");
            completions.post(move || callback(ok, id));
        });
    }

    /// Submits an append of a full record map (the generic write form).
    pub fn submit_write_record(
        &self,
        record: Record,
        callback: impl FnOnce(bool) + Send + 'static,
    ) {
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let pending = self.pending.begin();

        self.pool.execute(move || {
            let _pending = pending;
            let ok = match append_task(&table, &record) {
                Ok(()) => true,
                Err(err) => {
                    warn!("record write task failed: {err}");
                    false
                }
            };
            completions.post(move || callback(ok));
        });
    }

    /// Submits an in-place crypto pass over the configured text field of
    /// the record at `index`.
    pub fn submit_crypto(
        &self,
        index: usize,
        op: CryptoOp,
        callback: impl FnOnce(bool, usize) + Send + 'static,
    ) {
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let pending = self.pending.begin();
        let cipher = self.cipher.clone();
        let field_name = self.crypto_field.clone();

        self.pool.execute(move || {
            let _pending = pending;
            let ok = match crypto_task(&table, &cipher, &field_name, index, op) {
                Ok(()) => true,
                Err(err) => {
                    warn!(index, ?op, "crypto task failed: {err}");
                    false
                }
            };
            debug!(index, ?op, ok, "crypto task finished");
            completions.post(move || callback(ok, index));
        });
    }

    /// Submits a snapshot backup of the table file to `dest`.
    pub fn submit_backup(
        &self,
        dest: impl Into<PathBuf>,
        callback: impl FnOnce(bool, PathBuf) + Send + 'static,
    ) {
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let pending = self.pending.begin();
        let archiver = Arc::clone(&self.archiver);
        let dest = dest.into();

        self.pool.execute(move || {
            let _pending = pending;
            let ok = match backup_task(&table, archiver.as_ref(), &dest) {
                Ok(()) => true,
                Err(err) => {
                    warn!(dest = %dest.display(), "backup task failed: {err}");
                    false
                }
            };
            debug!(dest = %dest.display(), ok, "backup task finished");
            completions.post(move || callback(ok, dest));
        });
    }

    /// Submits an online schema extension.
    pub fn submit_modify_field(
        &self,
        field: FieldDef,
        callback: impl FnOnce(bool, String) + Send + 'static,
    ) {
        let table = Arc::clone(&self.table);
        let completions = self.completions.clone();
        let pending = self.pending.begin();
        let name = field.name.clone();

        self.pool.execute(move || {
            let _pending = pending;
            let ok = match modify_field_task(&table, field) {
                Ok(()) => true,
                Err(err) => {
                    warn!(field = %name, "modify-field task failed: {err}");
                    false
                }
            };
            completions.post(move || callback(ok, name));
        });
    }
}

impl Drop for TableManager {
    fn drop(&mut self) {
        // Submissions have stopped (we are being dropped); wait for the
        // in-flight tail so no task outlives the manager.
        self.pending.wait_idle();
    }
}

fn read_task(table: &Table, index: usize) -> CoreResult<Record> {
    let _guard = table.lock_data()?;
    table.read_record(index)
}

fn write_task(table: &Table, id: i32, name: &str, score: f32) -> CoreResult<()> {
    let name_len = table
        .field_def("name")
        .map_or(FIXED_STRING_LEN, |f| f.value_len);

    let mut record = Record::new();
    record.insert("id".into(), DataValue::int32(id));
    record.insert("name".into(), DataValue::text(name, name_len)?);
    record.insert("score".into(), DataValue::float32(score));

    let _guard = table.lock_data()?;
    table.append_record(&record)
}

fn append_task(table: &Table, record: &Record) -> CoreResult<()> {
    let _guard = table.lock_data()?;
    table.append_record(record)
}

/// The read-modify-write crypto pass.
///
/// Reads the record under the data lock, transforms exactly the target
/// field's slot outside it, then re-acquires the lock for the in-place
/// write and a read-back check that the stored slot equals the intended
/// bytes. All other fields round-trip untouched through the record map.
fn crypto_task(
    table: &Table,
    cipher: &RecordCipher,
    field_name: &str,
    index: usize,
    op: CryptoOp,
) -> CoreResult<()> {
    let mut record = {
        let _guard = table.lock_data()?;
        table.read_record(index)?
    };

    let field = table
        .field_def(field_name)
        .ok_or_else(|| CoreError::invalid_field(field_name, "not in schema"))?;
    if field.field_type != FieldType::Text {
        return Err(CoreError::invalid_field(field_name, "not a text field"));
    }
    let target_len = field.value_len;

    let value = record
        .get_mut(field_name)
        .ok_or_else(|| CoreError::invalid_field(field_name, "missing from record"))?;
    let DataValue::Text(text) = value else {
        return Err(CoreError::invalid_field(field_name, "not a text value"));
    };

    let transformed = match op {
        CryptoOp::Encrypt => cipher.encrypt(text.as_bytes()),
        CryptoOp::Decrypt => cipher.decrypt(text.as_bytes()),
    };
    if transformed.len() != target_len {
        return Err(CoreError::CryptoError {
            expected: target_len,
            actual: transformed.len(),
        });
    }
    text.replace_bytes(&transformed)?;

    let _guard = table.lock_data()?;
    table.write_record_at(index, &record)?;

    let verify = table.read_record(index)?;
    let written = verify
        .get(field_name)
        .and_then(DataValue::as_text)
        .ok_or_else(|| CoreError::invalid_field(field_name, "missing after write"))?;
    if written.as_bytes() != transformed.as_slice() {
        return Err(CoreError::WriteVerification { index });
    }
    Ok(())
}

fn backup_task(table: &Table, archiver: &dyn Archiver, dest: &Path) -> CoreResult<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let src = table.path()?;
    let _guard = table.lock_meta()?;
    // Push the current occupancy into the preamble so the archived copy
    // reopens with every record it contains.
    table.sync()?;
    archiver.compress_file(&src, dest)
}

fn modify_field_task(table: &Table, field: FieldDef) -> CoreResult<()> {
    let _guard = table.lock_meta()?;
    table.add_field(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::completion::CompletionQueue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    fn default_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::int32("id"),
            FieldDef::text("name", FIXED_STRING_LEN),
            FieldDef::float32("score"),
        ]
    }

    fn manager(dir: &std::path::Path) -> TableManager {
        let table = Arc::new(Table::create(dir.join("t.dat"), default_fields()).unwrap());
        TableManager::new(table, ManagerConfig::new().worker_threads(4))
    }

    #[test]
    fn write_then_read_via_callbacks() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        let wrote = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&wrote);
        mgr.submit_write(1, "test_single", 95.5, move |ok, id| {
            assert!(ok);
            assert_eq!(id, 1);
            flag.store(1, Ordering::SeqCst);
        });
        mgr.wait_for_all();
        assert_eq!(wrote.load(Ordering::SeqCst), 1);
        assert_eq!(mgr.record_count().unwrap(), 1);

        let seen = Arc::new(StdMutex::new(None));
        let slot = Arc::clone(&seen);
        mgr.submit_read(0, move |ok, record| {
            assert!(ok);
            *slot.lock().unwrap() = Some(record);
        });
        mgr.wait_for_all();

        let record = seen.lock().unwrap().take().unwrap();
        assert_eq!(record["id"].as_i32(), Some(1));
        assert_eq!(record["name"].as_text().unwrap().text(), "test_single");
        assert_eq!(record["score"].as_f32(), Some(95.5));
    }

    #[test]
    fn read_out_of_range_reports_failure() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        let outcome = Arc::new(AtomicUsize::new(99));
        let flag = Arc::clone(&outcome);
        mgr.submit_read(7, move |ok, record| {
            assert!(record.is_empty());
            flag.store(usize::from(ok), Ordering::SeqCst);
        });
        mgr.wait_for_all();
        assert_eq!(outcome.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn completions_run_on_pumped_queue() {
        let dir = tempdir().unwrap();
        let queue = CompletionQueue::new();
        let table = Arc::new(Table::create(dir.path().join("t.dat"), default_fields()).unwrap());
        let mgr = TableManager::new(
            table,
            ManagerConfig::new().completions(queue.sink()),
        );

        let ran = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&ran);
        mgr.submit_write(5, "queued", 1.0, move |_, _| {
            flag.fetch_add(1, Ordering::SeqCst);
        });
        mgr.wait_for_all();

        // The task is done but the completion waits for the pump.
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(queue.pump(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn crypto_roundtrip_restores_plaintext_in_place() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        mgr.submit_write(1, "secret_name", 3.5, |_, _| {});
        mgr.wait_for_all();

        mgr.submit_crypto(0, CryptoOp::Encrypt, |ok, _| assert!(ok));
        mgr.wait_for_all();

        let encrypted = mgr.table().read_record(0).unwrap();
        assert_ne!(encrypted["name"].as_text().unwrap().text(), "secret_name");
        // The rest of the record is untouched by the pass.
        assert_eq!(encrypted["id"].as_i32(), Some(1));
        assert_eq!(encrypted["score"].as_f32(), Some(3.5));

        mgr.submit_crypto(0, CryptoOp::Decrypt, |ok, _| assert!(ok));
        mgr.wait_for_all();

        let decrypted = mgr.table().read_record(0).unwrap();
        assert_eq!(decrypted["name"].as_text().unwrap().text(), "secret_name");
        // A full crypto round never appends.
        assert_eq!(mgr.record_count().unwrap(), 1);
    }

    #[test]
    fn crypto_on_missing_record_fails() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        let outcome = Arc::new(AtomicUsize::new(99));
        let flag = Arc::clone(&outcome);
        mgr.submit_crypto(0, CryptoOp::Encrypt, move |ok, _| {
            flag.store(usize::from(ok), Ordering::SeqCst);
        });
        mgr.wait_for_all();
        assert_eq!(outcome.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn modify_field_extends_schema() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        mgr.submit_write(1, "before", 1.0, |_, _| {});
        mgr.wait_for_all();

        let outcome = Arc::new(StdMutex::new(None));
        let slot = Arc::clone(&outcome);
        mgr.submit_modify_field(FieldDef::int32("age"), move |ok, name| {
            *slot.lock().unwrap() = Some((ok, name));
        });
        mgr.wait_for_all();

        assert_eq!(
            outcome.lock().unwrap().take(),
            Some((true, "age".to_string()))
        );
        assert_eq!(mgr.table().fields().len(), 4);
        let record = mgr.table().read_record(0).unwrap();
        assert_eq!(record["age"].as_i32(), Some(0));
    }

    #[test]
    fn backup_writes_archive() {
        let dir = tempdir().unwrap();
        let mgr = manager(dir.path());

        mgr.submit_write(1, "kept", 1.0, |_, _| {});
        mgr.wait_for_all();

        let dest = dir.path().join("backups").join("snap.zst");
        let done = Arc::new(AtomicUsize::new(99));
        let flag = Arc::clone(&done);
        mgr.submit_backup(&dest, move |ok, _| {
            flag.store(usize::from(ok), Ordering::SeqCst);
        });
        mgr.wait_for_all();

        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert!(dest.exists());
        assert!(std::fs::metadata(&dest).unwrap().len() > 0);
    }

    #[test]
    fn concurrent_writes_all_land() {
        let dir = tempdir().unwrap();
        let mgr = Arc::new(manager(dir.path()));

        let successes = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for worker in 0..4 {
            let mgr = Arc::clone(&mgr);
            let successes = Arc::clone(&successes);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let successes = Arc::clone(&successes);
                    mgr.submit_write(worker * 50 + i, "row", 1.0, move |ok, _| {
                        if ok {
                            successes.fetch_add(1, Ordering::SeqCst);
                        }
                    });
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        mgr.wait_for_all();

        assert_eq!(successes.load(Ordering::SeqCst), 200);
        assert_eq!(mgr.record_count().unwrap(), 200);
    }
}
