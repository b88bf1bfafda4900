//! Field schema types.

use crate::error::{CoreError, CoreResult};

/// Fixed upper bound for text field capacities, in bytes.
pub const FIXED_STRING_LEN: usize = 128;

/// Byte width of 32-bit numeric fields.
pub const NUMERIC_LEN: usize = 4;

/// The type of a table field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FieldType {
    /// 32-bit signed integer, 4 bytes.
    Int32 = 0,
    /// 32-bit float, 4 bytes.
    Float32 = 1,
    /// Fixed-capacity UTF-8 text, zero padded.
    Text = 2,
}

impl FieldType {
    /// Converts an on-disk tag byte to a field type.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Int32),
            1 => Some(Self::Float32),
            2 => Some(Self::Text),
            _ => None,
        }
    }

    /// Converts the field type to its on-disk tag byte.
    #[must_use]
    pub const fn as_tag(self) -> u8 {
        self as u8
    }
}

/// Definition of one table field: type, slot width, name.
///
/// A record is the packed concatenation of field slots in header order;
/// each slot occupies exactly `value_len` bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field type.
    pub field_type: FieldType,
    /// Slot width in bytes.
    pub value_len: usize,
    /// Field name (non-empty UTF-8, at most 255 bytes).
    pub name: String,
}

impl FieldDef {
    /// Creates a field definition.
    pub fn new(field_type: FieldType, value_len: usize, name: impl Into<String>) -> Self {
        Self {
            field_type,
            value_len,
            name: name.into(),
        }
    }

    /// Convenience constructor for a 4-byte integer field.
    pub fn int32(name: impl Into<String>) -> Self {
        Self::new(FieldType::Int32, NUMERIC_LEN, name)
    }

    /// Convenience constructor for a 4-byte float field.
    pub fn float32(name: impl Into<String>) -> Self {
        Self::new(FieldType::Float32, NUMERIC_LEN, name)
    }

    /// Convenience constructor for a text field of the given capacity.
    pub fn text(name: impl Into<String>, value_len: usize) -> Self {
        Self::new(FieldType::Text, value_len, name)
    }

    /// Validates the definition against the schema invariants.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] if the name is empty or too
    /// long, or the slot width disagrees with the type.
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.is_empty() {
            return Err(CoreError::invalid_field("", "name is empty"));
        }
        if self.name.len() > u8::MAX as usize {
            return Err(CoreError::invalid_field(
                &self.name,
                format!("name is {} bytes, limit is {}", self.name.len(), u8::MAX),
            ));
        }
        match self.field_type {
            FieldType::Int32 | FieldType::Float32 => {
                if self.value_len != NUMERIC_LEN {
                    return Err(CoreError::invalid_field(
                        &self.name,
                        format!("numeric fields are {NUMERIC_LEN} bytes, got {}", self.value_len),
                    ));
                }
            }
            FieldType::Text => {
                if self.value_len == 0 || self.value_len > FIXED_STRING_LEN {
                    return Err(CoreError::invalid_field(
                        &self.name,
                        format!(
                            "text capacity must be 1..={FIXED_STRING_LEN}, got {}",
                            self.value_len
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}
