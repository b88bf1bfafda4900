//! Table initialization from declared specs.
//!
//! The initializer owns the database root directory. For every declared
//! table it either loads the existing file - validating that the
//! on-disk schema equals the declared one element for element - or
//! creates a fresh file. Tables that fail to load or validate are
//! skipped with a logged reason rather than aborting the whole run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::TableSpec;
use crate::error::{CoreError, CoreResult};
use crate::field::FieldDef;
use crate::table::Table;

/// Creates or loads the tables declared in a configuration.
#[derive(Debug)]
pub struct Initializer {
    root: PathBuf,
}

impl Initializer {
    /// Creates an initializer over `root`, creating the directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be created.
    pub fn new<P: AsRef<Path>>(root: P) -> CoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The database root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads or creates every declared table.
    ///
    /// Invalid entries (empty name or alias, bad fields) and tables
    /// whose on-disk schema disagrees with the declaration are skipped
    /// with a warning; the returned map holds the tables that opened,
    /// keyed by alias.
    ///
    /// # Errors
    ///
    /// Only infrastructure failures (the root directory disappearing)
    /// error out; per-table problems are skips, not errors.
    pub fn initialize(&self, specs: &[TableSpec]) -> CoreResult<BTreeMap<String, Arc<Table>>> {
        let mut tables = BTreeMap::new();

        for spec in specs {
            if spec.name.is_empty() || spec.alias.is_empty() {
                warn!("skipping table entry with empty name or alias");
                continue;
            }
            match self.load_or_create(spec) {
                Ok(table) => {
                    info!(table = %spec.name, alias = %spec.alias, "table ready");
                    tables.insert(spec.alias.clone(), Arc::new(table));
                }
                Err(err) => {
                    warn!(table = %spec.name, alias = %spec.alias, "skipping table: {err}");
                }
            }
        }
        Ok(tables)
    }

    /// Loads or creates one declared table.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SchemaMismatch`] when an existing file's
    /// field list disagrees with the declaration, or any create/load
    /// failure.
    pub fn load_or_create(&self, spec: &TableSpec) -> CoreResult<Table> {
        let fields = spec.field_defs()?;
        let path = self.root.join(&spec.alias);

        if path.exists() {
            let table = Table::load(&path)?;
            validate_schema(&spec.alias, &table.fields(), &fields)?;
            Ok(table)
        } else {
            Table::create(&path, fields)
        }
    }
}

/// Checks that the on-disk field list equals the declared one, element
/// for element: order, name, type and slot width.
fn validate_schema(alias: &str, actual: &[FieldDef], expected: &[FieldDef]) -> CoreResult<()> {
    if actual.len() != expected.len() {
        return Err(CoreError::schema_mismatch(
            alias,
            format!(
                "field count mismatch: declared {}, on disk {}",
                expected.len(),
                actual.len()
            ),
        ));
    }

    for (index, (declared, on_disk)) in expected.iter().zip(actual.iter()).enumerate() {
        if declared.name != on_disk.name {
            return Err(CoreError::schema_mismatch(
                alias,
                format!(
                    "field {index} name mismatch: declared '{}', on disk '{}'",
                    declared.name, on_disk.name
                ),
            ));
        }
        if declared.field_type != on_disk.field_type {
            return Err(CoreError::schema_mismatch(
                alias,
                format!("field '{}' type mismatch", declared.name),
            ));
        }
        if declared.value_len != on_disk.value_len {
            return Err(CoreError::schema_mismatch(
                alias,
                format!(
                    "field '{}' width mismatch: declared {}, on disk {}",
                    declared.name, declared.value_len, on_disk.value_len
                ),
            ));
        }
    }
    Ok(())
}
