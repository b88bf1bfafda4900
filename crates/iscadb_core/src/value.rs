//! Tagged record values.

use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::field::{FieldType, FIXED_STRING_LEN, NUMERIC_LEN};

/// A record: field name to value.
pub type Record = BTreeMap<String, DataValue>;

/// Fixed-capacity text payload.
///
/// Holds exactly the declared slot width; shorter strings are
/// right-padded with zero bytes, so the stored byte length is always the
/// field's `value_len`, never the UTF-8 length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedText {
    bytes: Vec<u8>,
}

impl FixedText {
    /// Builds a padded payload from a string, truncating at `value_len`
    /// bytes if the string is longer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] if `value_len` exceeds
    /// [`FIXED_STRING_LEN`] or is zero.
    pub fn new(text: &str, value_len: usize) -> CoreResult<Self> {
        Self::from_bytes(text.as_bytes(), value_len)
    }

    /// Builds a padded payload from raw bytes, truncating at `value_len`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] if `value_len` exceeds
    /// [`FIXED_STRING_LEN`] or is zero.
    pub fn from_bytes(source: &[u8], value_len: usize) -> CoreResult<Self> {
        if value_len == 0 || value_len > FIXED_STRING_LEN {
            return Err(CoreError::invalid_field(
                "",
                format!("text capacity must be 1..={FIXED_STRING_LEN}, got {value_len}"),
            ));
        }
        let mut bytes = vec![0u8; value_len];
        let take = source.len().min(value_len);
        bytes[..take].copy_from_slice(&source[..take]);
        Ok(Self { bytes })
    }

    /// Wraps an exact-width slot read back from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] if the slot width is invalid.
    pub fn from_slot(slot: Vec<u8>) -> CoreResult<Self> {
        if slot.is_empty() || slot.len() > FIXED_STRING_LEN {
            return Err(CoreError::invalid_field(
                "",
                format!("slot width must be 1..={FIXED_STRING_LEN}, got {}", slot.len()),
            ));
        }
        Ok(Self { bytes: slot })
    }

    /// The full padded slot, exactly `value_len` bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The slot width.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the slot is empty (never true for a valid payload).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The text with trailing zero padding removed.
    ///
    /// Lossy for non-UTF-8 content, which crypto transforms routinely
    /// produce.
    #[must_use]
    pub fn text(&self) -> Cow<'_, str> {
        let end = self
            .bytes
            .iter()
            .rposition(|b| *b != 0)
            .map_or(0, |pos| pos + 1);
        String::from_utf8_lossy(&self.bytes[..end])
    }

    /// Replaces the payload bytes; the new slice must match the slot width.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CryptoError`] on width mismatch, since the
    /// only caller of in-place replacement is the crypto path.
    pub fn replace_bytes(&mut self, bytes: &[u8]) -> CoreResult<()> {
        if bytes.len() != self.bytes.len() {
            return Err(CoreError::CryptoError {
                expected: self.bytes.len(),
                actual: bytes.len(),
            });
        }
        self.bytes.copy_from_slice(bytes);
        Ok(())
    }
}

/// A single field value, tagged with its type.
///
/// Each variant carries its declared byte length: numerics are always 4
/// bytes, text carries a full zero-padded slot.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// 32-bit signed integer.
    Int32(i32),
    /// 32-bit float.
    Float32(f32),
    /// Fixed-capacity text slot.
    Text(FixedText),
}

impl DataValue {
    /// Creates an integer value.
    #[must_use]
    pub fn int32(value: i32) -> Self {
        Self::Int32(value)
    }

    /// Creates a float value.
    #[must_use]
    pub fn float32(value: f32) -> Self {
        Self::Float32(value)
    }

    /// Creates a text value with the given slot capacity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] for invalid capacities.
    pub fn text(text: &str, value_len: usize) -> CoreResult<Self> {
        Ok(Self::Text(FixedText::new(text, value_len)?))
    }

    /// The field type this value carries.
    #[must_use]
    pub fn field_type(&self) -> FieldType {
        match self {
            Self::Int32(_) => FieldType::Int32,
            Self::Float32(_) => FieldType::Float32,
            Self::Text(_) => FieldType::Text,
        }
    }

    /// The declared byte length of this value's slot.
    #[must_use]
    pub fn value_len(&self) -> usize {
        match self {
            Self::Int32(_) | Self::Float32(_) => NUMERIC_LEN,
            Self::Text(text) => text.len(),
        }
    }

    /// The integer payload, if this is an integer.
    #[must_use]
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::Int32(value) => Some(*value),
            _ => None,
        }
    }

    /// The float payload, if this is a float.
    #[must_use]
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::Float32(value) => Some(*value),
            _ => None,
        }
    }

    /// The text payload, if this is text.
    #[must_use]
    pub fn as_text(&self) -> Option<&FixedText> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Serializes the value into its slot bytes (little endian).
    #[must_use]
    pub fn to_slot_bytes(&self) -> Vec<u8> {
        match self {
            Self::Int32(value) => value.to_le_bytes().to_vec(),
            Self::Float32(value) => value.to_le_bytes().to_vec(),
            Self::Text(text) => text.as_bytes().to_vec(),
        }
    }

    /// Deserializes a slot into a typed value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] if the slot width disagrees
    /// with the type.
    pub fn from_slot_bytes(field_type: FieldType, slot: &[u8]) -> CoreResult<Self> {
        match field_type {
            FieldType::Int32 => {
                let bytes: [u8; NUMERIC_LEN] = slot.try_into().map_err(|_| {
                    CoreError::invalid_field("", format!("int slot is {} bytes", slot.len()))
                })?;
                Ok(Self::Int32(i32::from_le_bytes(bytes)))
            }
            FieldType::Float32 => {
                let bytes: [u8; NUMERIC_LEN] = slot.try_into().map_err(|_| {
                    CoreError::invalid_field("", format!("float slot is {} bytes", slot.len()))
                })?;
                Ok(Self::Float32(f32::from_le_bytes(bytes)))
            }
            FieldType::Text => Ok(Self::Text(FixedText::from_slot(slot.to_vec())?)),
        }
    }
}
