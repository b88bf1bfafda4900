//! Typed fixed-width table over the mapped substrate.
//!
//! A table file is one [`MappedFile`] whose data area starts with the
//! serialized header and continues with packed records. Records are
//! append-only; fields may be added online but never removed or renamed.
//!
//! ## Locking
//!
//! Each table carries two recursive locks:
//!
//! - the *data* lock serializes record reads, appends and overwrites;
//! - the *meta* lock serializes schema changes and backup snapshots.
//!
//! Both are acquired with a 5 second bound; a timed-out acquisition
//! fails the operation instead of blocking indefinitely. They are
//! recursive because public methods re-enter through helpers (a crypto
//! pass holds the data lock while calling `write_record_at`, which
//! takes it again). Schema changes take meta first, then data - the one
//! consistent order.

use std::path::{Path, PathBuf};
use std::time::Duration;

use iscadb_storage::{MappedFile, MappedFileOptions, OpenMode, PREAMBLE_SIZE};
use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::field::FieldDef;
use crate::header::TableHeader;
use crate::value::{DataValue, Record};

/// Bound on lock acquisition.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Initial substrate size for a new table file.
const INITIAL_TABLE_SIZE: usize = 1024 * 1024;

/// A guard on one of the table locks.
pub type TableLockGuard<'a> = ReentrantMutexGuard<'a, ()>;

/// A schema-driven fixed-width record table backed by one mapped file.
pub struct Table {
    file: MappedFile,
    header: RwLock<TableHeader>,
    data_lock: ReentrantMutex<()>,
    meta_lock: ReentrantMutex<()>,
}

impl Table {
    /// Creates a new table file with the given schema.
    ///
    /// The substrate is created at 1 MiB and the serialized header is
    /// appended as the first payload bytes. The table is left open.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] for an invalid schema or a
    /// storage error from file creation.
    pub fn create<P: AsRef<Path>>(path: P, fields: Vec<FieldDef>) -> CoreResult<Self> {
        Self::create_with(path, fields, MappedFileOptions::default())
    }

    /// Creates a new table file with explicit substrate tuning options.
    ///
    /// # Errors
    ///
    /// Same as [`Table::create`].
    pub fn create_with<P: AsRef<Path>>(
        path: P,
        fields: Vec<FieldDef>,
        options: MappedFileOptions,
    ) -> CoreResult<Self> {
        let header = TableHeader::new(fields)?;
        let file = MappedFile::create_with(path, INITIAL_TABLE_SIZE, options)?;
        file.append(&header.encode())?;

        Ok(Self {
            file,
            header: RwLock::new(header),
            data_lock: ReentrantMutex::new(()),
            meta_lock: ReentrantMutex::new(()),
        })
    }

    /// Loads an existing table file, parsing and validating its header.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidHeader`] for a malformed header or a
    /// record area that is not a whole number of records, or a storage
    /// error (bad magic, bad preamble, I/O).
    pub fn load<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::load_with(path, MappedFileOptions::default())
    }

    /// Loads an existing table file with explicit substrate tuning options.
    ///
    /// # Errors
    ///
    /// Same as [`Table::load`].
    pub fn load_with<P: AsRef<Path>>(path: P, options: MappedFileOptions) -> CoreResult<Self> {
        let file = MappedFile::open_with(path, OpenMode::ReadWrite, options)?;
        let header = TableHeader::read_from(&file)?;

        let data_len = file.used_size()? - PREAMBLE_SIZE - header.total_len();
        if data_len % header.record_size() != 0 {
            return Err(CoreError::invalid_header(format!(
                "record area of {data_len} bytes is not a multiple of record size {}",
                header.record_size()
            )));
        }

        Ok(Self {
            file,
            header: RwLock::new(header),
            data_lock: ReentrantMutex::new(()),
            meta_lock: ReentrantMutex::new(()),
        })
    }

    /// Acquires the data lock, waiting at most [`LOCK_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] on expiry.
    pub fn lock_data(&self) -> CoreResult<TableLockGuard<'_>> {
        self.data_lock.try_lock_for(LOCK_TIMEOUT).ok_or_else(|| {
            warn!("data lock acquisition timed out");
            CoreError::LockTimeout {
                which: "data",
                seconds: LOCK_TIMEOUT.as_secs(),
            }
        })
    }

    /// Acquires the meta lock, waiting at most [`LOCK_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockTimeout`] on expiry.
    pub fn lock_meta(&self) -> CoreResult<TableLockGuard<'_>> {
        self.meta_lock.try_lock_for(LOCK_TIMEOUT).ok_or_else(|| {
            warn!("meta lock acquisition timed out");
            CoreError::LockTimeout {
                which: "meta",
                seconds: LOCK_TIMEOUT.as_secs(),
            }
        })
    }

    /// Number of complete records currently stored.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is closed.
    pub fn record_count(&self) -> CoreResult<usize> {
        let header = self.header.read();
        let used = self.file.used_size()?;
        Ok((used - PREAMBLE_SIZE - header.total_len()) / header.record_size())
    }

    /// Reads the record at `index` into a typed map.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index` is at or past
    /// the record count, [`CoreError::LockTimeout`] on lock expiry, or a
    /// storage error.
    pub fn read_record(&self, index: usize) -> CoreResult<Record> {
        let _guard = self.lock_data()?;
        let header = self.header.read().clone();

        let count = self.record_count()?;
        if index >= count {
            return Err(CoreError::IndexOutOfRange { index, count });
        }

        let record_offset = header.total_len() + index * header.record_size();
        let mut record = Record::new();
        let mut field_offset = 0;
        for field in header.fields() {
            let slot = self.file.read_at(record_offset + field_offset, field.value_len)?;
            let value = DataValue::from_slot_bytes(field.field_type, &slot)?;
            record.insert(field.name.clone(), value);
            field_offset += field.value_len;
        }
        Ok(record)
    }

    /// Appends a record.
    ///
    /// Every field of the schema must be present with matching type and
    /// slot width; any mismatch aborts the whole record and nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] on a missing or mismatched
    /// field, [`CoreError::LockTimeout`] on lock expiry, or a storage
    /// error (capacity, read-only, closed).
    pub fn append_record(&self, record: &Record) -> CoreResult<()> {
        let _guard = self.lock_data()?;
        let header = self.header.read().clone();

        let buf = pack_record(&header, record)?;
        self.file.ensure_capacity(buf.len())?;
        self.file.append(&buf).map_err(CoreError::from)
    }

    /// Overwrites the record at `index` in place.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::IndexOutOfRange`] if `index` is at or past
    /// the record count; otherwise as [`Table::append_record`].
    pub fn write_record_at(&self, index: usize, record: &Record) -> CoreResult<()> {
        let _guard = self.lock_data()?;
        let header = self.header.read().clone();

        let count = self.record_count()?;
        if index >= count {
            return Err(CoreError::IndexOutOfRange { index, count });
        }

        let buf = pack_record(&header, record)?;
        let offset = header.total_len() + index * header.record_size();
        self.file.write_at(&buf, offset).map_err(CoreError::from)
    }

    /// Appends a new field to the schema, migrating existing records.
    ///
    /// Takes the meta lock, then the data lock. Every fallible step -
    /// validation, duplicate check, capacity reservation for the entire
    /// post-migration layout - happens before the first byte of the file
    /// changes; the migration itself is pure in-mapping copying done
    /// from the last record to the first, so earlier records are still
    /// unread when their old bytes get overwritten. The new trailing
    /// slot of every migrated record is zero.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] for an invalid or duplicate
    /// field, [`CoreError::LockTimeout`] on lock expiry, or a storage
    /// error (capacity). On error the file and in-memory schema are as
    /// they were.
    pub fn add_field(&self, field: FieldDef) -> CoreResult<()> {
        let _meta = self.lock_meta()?;
        let _data = self.lock_data()?;

        field.validate()?;
        let current = self.header.read().clone();
        if current.field(&field.name).is_some() {
            return Err(CoreError::invalid_field(&field.name, "field already exists"));
        }
        let widened = current.with_field(field.clone())?;

        let old_header_len = current.total_len();
        let new_header_len = widened.total_len();
        let old_record_size = current.record_size();
        let new_record_size = widened.record_size();

        let used = self.file.used_size()?;
        let count = (used - PREAMBLE_SIZE - old_header_len) / old_record_size;
        let new_used = PREAMBLE_SIZE + new_header_len + count * new_record_size;
        if new_used > used {
            self.file.ensure_capacity(new_used - used)?;
        }

        // Last-to-first: every new offset is at or past the old one, so
        // a record's old bytes are only clobbered by records at the same
        // or a higher index, which have already been moved.
        for index in (0..count).rev() {
            let old_offset = old_header_len + index * old_record_size;
            let new_offset = new_header_len + index * new_record_size;
            let bytes = self.file.read_at(old_offset, old_record_size)?;
            let mut slot = vec![0u8; new_record_size];
            slot[..old_record_size].copy_from_slice(&bytes);
            self.file.write_at(&slot, new_offset)?;
        }

        self.file.write_at(&widened.encode(), 0)?;
        self.file.set_used_size(new_used)?;
        self.file.sync()?;

        *self.header.write() = widened;
        debug!(
            field = %field.name,
            records = count,
            record_size = new_record_size,
            "schema extended"
        );
        Ok(())
    }

    /// Looks up a field definition by name.
    #[must_use]
    pub fn field_def(&self, name: &str) -> Option<FieldDef> {
        self.header.read().field(name).cloned()
    }

    /// The current field list, in slot order.
    #[must_use]
    pub fn fields(&self) -> Vec<FieldDef> {
        self.header.read().fields().to_vec()
    }

    /// Byte length of the encoded header.
    #[must_use]
    pub fn header_total_len(&self) -> usize {
        self.header.read().total_len()
    }

    /// Record size: the sum of all slot widths.
    #[must_use]
    pub fn record_size(&self) -> usize {
        self.header.read().record_size()
    }

    /// The path of the backing file.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the file is closed.
    pub fn path(&self) -> CoreResult<PathBuf> {
        Ok(self.file.path()?)
    }

    /// Whether the backing file is open.
    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Persists the current `used_size` into the preamble and syncs the
    /// mapping without closing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the sync fails.
    pub fn sync(&self) -> CoreResult<()> {
        self.file.sync().map_err(CoreError::from)
    }

    /// Closes the table, flushing `used_size` and syncing the mapping.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the final sync fails.
    pub fn close(&self) -> CoreResult<()> {
        self.file.close().map_err(CoreError::from)
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("file", &self.file)
            .field("fields", &self.header.read().fields().len())
            .finish()
    }
}

/// Packs a record into its contiguous slot buffer, validating every
/// field against the schema first.
fn pack_record(header: &TableHeader, record: &Record) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::with_capacity(header.record_size());
    for field in header.fields() {
        let value = record.get(&field.name).ok_or_else(|| {
            CoreError::invalid_field(&field.name, "missing from record")
        })?;
        if value.field_type() != field.field_type {
            return Err(CoreError::invalid_field(
                &field.name,
                format!(
                    "type mismatch: schema {:?}, value {:?}",
                    field.field_type,
                    value.field_type()
                ),
            ));
        }
        if value.value_len() != field.value_len {
            return Err(CoreError::invalid_field(
                &field.name,
                format!(
                    "slot width mismatch: schema {}, value {}",
                    field.value_len,
                    value.value_len()
                ),
            ));
        }
        buf.extend_from_slice(&value.to_slot_bytes());
    }
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FIXED_STRING_LEN;
    use tempfile::tempdir;

    fn sample_fields() -> Vec<FieldDef> {
        vec![
            FieldDef::int32("id"),
            FieldDef::text("name", FIXED_STRING_LEN),
            FieldDef::float32("score"),
        ]
    }

    fn sample_record(id: i32, name: &str, score: f32) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), DataValue::int32(id));
        record.insert(
            "name".into(),
            DataValue::text(name, FIXED_STRING_LEN).unwrap(),
        );
        record.insert("score".into(), DataValue::float32(score));
        record
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        table
            .append_record(&sample_record(1, "test_single", 95.5))
            .unwrap();
        assert_eq!(table.record_count().unwrap(), 1);

        let record = table.read_record(0).unwrap();
        assert_eq!(record["id"].as_i32(), Some(1));
        assert_eq!(record["name"].as_text().unwrap().text(), "test_single");
        assert_eq!(record["score"].as_f32(), Some(95.5));
    }

    #[test]
    fn missing_field_aborts_append() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        let mut record = sample_record(1, "x", 1.0);
        record.remove("score");
        assert!(matches!(
            table.append_record(&record),
            Err(CoreError::InvalidField { .. })
        ));
        assert_eq!(table.record_count().unwrap(), 0);
    }

    #[test]
    fn type_mismatch_aborts_append() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        let mut record = sample_record(1, "x", 1.0);
        record.insert("score".into(), DataValue::int32(1));
        assert!(matches!(
            table.append_record(&record),
            Err(CoreError::InvalidField { .. })
        ));

        let mut record = sample_record(1, "x", 1.0);
        record.insert("name".into(), DataValue::text("x", 64).unwrap());
        assert!(matches!(
            table.append_record(&record),
            Err(CoreError::InvalidField { .. })
        ));
        assert_eq!(table.record_count().unwrap(), 0);
    }

    #[test]
    fn read_bounds_follow_record_count() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        assert!(matches!(
            table.read_record(0),
            Err(CoreError::IndexOutOfRange { .. })
        ));

        table.append_record(&sample_record(1, "a", 1.0)).unwrap();
        assert!(table.read_record(0).is_ok());
        assert!(matches!(
            table.read_record(1),
            Err(CoreError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn overwrite_in_place() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        table.append_record(&sample_record(1, "first", 1.0)).unwrap();
        table.append_record(&sample_record(2, "second", 2.0)).unwrap();

        table
            .write_record_at(0, &sample_record(9, "patched", 9.0))
            .unwrap();
        assert_eq!(table.record_count().unwrap(), 2);

        let record = table.read_record(0).unwrap();
        assert_eq!(record["id"].as_i32(), Some(9));
        assert_eq!(record["name"].as_text().unwrap().text(), "patched");

        let untouched = table.read_record(1).unwrap();
        assert_eq!(untouched["id"].as_i32(), Some(2));
    }

    #[test]
    fn overwrite_out_of_range_fails() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        table.append_record(&sample_record(1, "a", 1.0)).unwrap();
        assert!(matches!(
            table.write_record_at(1, &sample_record(2, "b", 2.0)),
            Err(CoreError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn load_reproduces_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");

        let table = Table::create(&path, sample_fields()).unwrap();
        let created_len = table.header_total_len();
        table.close().unwrap();

        let loaded = Table::load(&path).unwrap();
        assert_eq!(loaded.fields(), sample_fields());
        assert_eq!(loaded.header_total_len(), created_len);
        assert_eq!(loaded.record_size(), 4 + FIXED_STRING_LEN + 4);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");

        {
            let table = Table::create(&path, sample_fields()).unwrap();
            for i in 0..3 {
                table
                    .append_record(&sample_record(i, &format!("row_{i}"), i as f32))
                    .unwrap();
            }
            table.close().unwrap();
        }

        let table = Table::load(&path).unwrap();
        assert_eq!(table.record_count().unwrap(), 3);
        let record = table.read_record(1).unwrap();
        assert_eq!(record["id"].as_i32(), Some(1));
        assert_eq!(record["name"].as_text().unwrap().text(), "row_1");
    }

    #[test]
    fn add_field_on_empty_table() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        table.add_field(FieldDef::int32("age")).unwrap();
        assert_eq!(table.fields().len(), 4);
        assert_eq!(table.record_size(), 4 + FIXED_STRING_LEN + 4 + 4);
        assert_eq!(table.record_count().unwrap(), 0);

        let mut record = sample_record(1, "a", 1.0);
        record.insert("age".into(), DataValue::int32(30));
        table.append_record(&record).unwrap();
        assert_eq!(table.read_record(0).unwrap()["age"].as_i32(), Some(30));
    }

    #[test]
    fn add_field_migrates_existing_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.dat");
        let table = Table::create(&path, sample_fields()).unwrap();

        for i in 0..10 {
            table
                .append_record(&sample_record(i, &format!("row_{i}"), 50.0 + i as f32))
                .unwrap();
        }

        table
            .add_field(FieldDef::text("comment", 32))
            .unwrap();
        assert_eq!(table.record_count().unwrap(), 10);

        for i in 0..10usize {
            let record = table.read_record(i).unwrap();
            assert_eq!(record["id"].as_i32(), Some(i as i32));
            assert_eq!(record["name"].as_text().unwrap().text(), format!("row_{i}"));
            assert_eq!(record["score"].as_f32(), Some(50.0 + i as f32));
            // New slot reads back as all zeros.
            assert_eq!(record["comment"].as_text().unwrap().text(), "");
        }

        // The widened layout survives a reopen.
        table.close().unwrap();
        let reloaded = Table::load(&path).unwrap();
        assert_eq!(reloaded.record_count().unwrap(), 10);
        assert_eq!(reloaded.fields().len(), 4);
        let record = reloaded.read_record(9).unwrap();
        assert_eq!(record["name"].as_text().unwrap().text(), "row_9");
    }

    #[test]
    fn add_field_rejects_duplicates_and_invalid() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();
        table.append_record(&sample_record(1, "a", 1.0)).unwrap();

        assert!(matches!(
            table.add_field(FieldDef::int32("id")),
            Err(CoreError::InvalidField { .. })
        ));
        assert!(matches!(
            table.add_field(FieldDef::text("wide", 4096)),
            Err(CoreError::InvalidField { .. })
        ));

        // Schema and data untouched by the failed attempts.
        assert_eq!(table.fields(), sample_fields());
        assert_eq!(table.record_count().unwrap(), 1);
        let record = table.read_record(0).unwrap();
        assert_eq!(record["name"].as_text().unwrap().text(), "a");
    }

    #[test]
    fn add_field_when_migration_spills_past_initial_mapping() {
        let dir = tempdir().unwrap();
        let table = Table::create(dir.path().join("t.dat"), sample_fields()).unwrap();

        // ~7000 records x 136 bytes fills most of the initial 1 MiB.
        for i in 0..7000 {
            table
                .append_record(&sample_record(i, "bulk", 0.0))
                .unwrap();
        }
        table.add_field(FieldDef::text("extra", 128)).unwrap();

        assert_eq!(table.record_count().unwrap(), 7000);
        let record = table.read_record(6999).unwrap();
        assert_eq!(record["id"].as_i32(), Some(6999));
        assert_eq!(record["extra"].as_text().unwrap().text(), "");
    }
}
