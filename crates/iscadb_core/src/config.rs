//! Database configuration document.
//!
//! The configuration is a JSON document with a `tables` array; each
//! entry names a table, the file it lives in (`alias`, relative to the
//! database root) and its fields:
//!
//! ```json
//! {
//!   "tables": [
//!     {
//!       "name": "students",
//!       "alias": "students.dat",
//!       "fields": [
//!         { "name": "id", "type": "int", "valueLen": 4 },
//!         { "name": "name", "type": "string", "valueLen": 128 },
//!         { "name": "score", "type": "float", "valueLen": 4 }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::field::{FieldDef, FieldType};

/// One field in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name.
    pub name: String,
    /// Field type: `"int"`, `"float"` or `"string"`.
    #[serde(rename = "type")]
    pub field_type: String,
    /// Slot width in bytes.
    #[serde(rename = "valueLen")]
    pub value_len: u64,
}

impl FieldSpec {
    /// Converts the spec into a validated field definition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] for an unknown type string, or
    /// [`CoreError::InvalidField`] for an invalid definition.
    pub fn to_field_def(&self) -> CoreResult<FieldDef> {
        let field_type = match self.field_type.as_str() {
            "int" => FieldType::Int32,
            "float" => FieldType::Float32,
            "string" => FieldType::Text,
            other => {
                return Err(CoreError::config(format!(
                    "unknown field type '{other}' for field '{}'",
                    self.name
                )))
            }
        };
        let def = FieldDef::new(field_type, self.value_len as usize, &self.name);
        def.validate()?;
        Ok(def)
    }
}

/// One table in the configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    /// Human-readable table name.
    pub name: String,
    /// File name under the database root directory.
    pub alias: String,
    /// Field list, in slot order.
    pub fields: Vec<FieldSpec>,
}

impl TableSpec {
    /// Converts every field spec into a validated definition.
    ///
    /// # Errors
    ///
    /// Fails on the first invalid field.
    pub fn field_defs(&self) -> CoreResult<Vec<FieldDef>> {
        self.fields.iter().map(FieldSpec::to_field_def).collect()
    }
}

/// The whole configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Declared tables.
    pub tables: Vec<TableSpec>,
}

impl DatabaseConfig {
    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] on malformed JSON.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or
    /// [`CoreError::Config`] on malformed JSON.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        Self::from_json_str(&fs::read_to_string(path)?)
    }
}
