//! Table header serialization.
//!
//! The header is the first payload in the data area, immediately after
//! the preamble:
//!
//! ```text
//! | total_len (8, LE) | field_count (1) | field entries ... |
//!
//! field entry: | type tag (1) | value_len (8, LE) | name_len (1) | name |
//! ```
//!
//! `total_len` is the byte count of the whole block including itself.
//! Records follow at logical offset `total_len`.

use iscadb_storage::MappedFile;

use crate::error::{CoreError, CoreResult};
use crate::field::{FieldDef, FieldType};

/// Fixed bytes before the field entries: total_len + field_count.
const FIXED_PREFIX_LEN: usize = 8 + 1;

/// Fixed bytes of one field entry before its name.
const FIELD_PREFIX_LEN: usize = 1 + 8 + 1;

/// Parsed (or freshly built) table header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    fields: Vec<FieldDef>,
    total_len: usize,
    record_size: usize,
}

impl TableHeader {
    /// Builds a header from a field list.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidField`] if the list is empty, longer
    /// than 255 entries, contains an invalid definition or a duplicate
    /// name.
    pub fn new(fields: Vec<FieldDef>) -> CoreResult<Self> {
        if fields.is_empty() {
            return Err(CoreError::invalid_field("", "field list is empty"));
        }
        if fields.len() > u8::MAX as usize {
            return Err(CoreError::invalid_field(
                "",
                format!("{} fields, limit is {}", fields.len(), u8::MAX),
            ));
        }
        for (index, field) in fields.iter().enumerate() {
            field.validate()?;
            if fields[..index].iter().any(|f| f.name == field.name) {
                return Err(CoreError::invalid_field(&field.name, "duplicate field name"));
            }
        }

        let total_len = Self::encoded_len(&fields);
        let record_size = fields.iter().map(|f| f.value_len).sum();
        Ok(Self {
            fields,
            total_len,
            record_size,
        })
    }

    /// The fields, in header (and record slot) order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Byte length of the encoded header.
    #[must_use]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Record size: the sum of all slot widths.
    #[must_use]
    pub fn record_size(&self) -> usize {
        self.record_size
    }

    /// Returns a new header with `field` appended.
    ///
    /// # Errors
    ///
    /// Same as [`TableHeader::new`].
    pub fn with_field(&self, field: FieldDef) -> CoreResult<Self> {
        let mut fields = self.fields.clone();
        fields.push(field);
        Self::new(fields)
    }

    fn encoded_len(fields: &[FieldDef]) -> usize {
        FIXED_PREFIX_LEN
            + fields
                .iter()
                .map(|f| FIELD_PREFIX_LEN + f.name.len())
                .sum::<usize>()
    }

    /// Serializes the header block.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.total_len);
        buf.extend_from_slice(&(self.total_len as u64).to_le_bytes());
        buf.push(self.fields.len() as u8);
        for field in &self.fields {
            buf.push(field.field_type.as_tag());
            buf.extend_from_slice(&(field.value_len as u64).to_le_bytes());
            buf.push(field.name.len() as u8);
            buf.extend_from_slice(field.name.as_bytes());
        }
        debug_assert_eq!(buf.len(), self.total_len);
        buf
    }

    /// Parses the header from the start of a table file's data area.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidHeader`] if the block is malformed:
    /// unknown type tag, invalid field, non-UTF-8 name, or a consumed
    /// byte count that disagrees with `total_len`.
    pub fn read_from(file: &MappedFile) -> CoreResult<Self> {
        let used = file.used_size()?;
        let data_len = used - iscadb_storage::PREAMBLE_SIZE;

        let total_le = file.read_at(0, 8)?;
        let total_len = u64::from_le_bytes(total_le.as_slice().try_into().map_err(|_| {
            CoreError::invalid_header("short read on header length")
        })?) as usize;

        if total_len < FIXED_PREFIX_LEN || total_len > data_len {
            return Err(CoreError::invalid_header(format!(
                "header length {total_len} outside [{FIXED_PREFIX_LEN}, {data_len}]"
            )));
        }

        let field_count = file.read_at(8, 1)?[0];
        let mut offset = FIXED_PREFIX_LEN;
        let mut fields = Vec::with_capacity(field_count as usize);

        for _ in 0..field_count {
            if offset + FIELD_PREFIX_LEN > total_len {
                return Err(CoreError::invalid_header("field entry overruns header"));
            }
            let entry = file.read_at(offset, FIELD_PREFIX_LEN)?;
            offset += FIELD_PREFIX_LEN;

            let field_type = FieldType::from_tag(entry[0])
                .ok_or_else(|| CoreError::invalid_header(format!("unknown type tag {}", entry[0])))?;
            let value_len = u64::from_le_bytes(
                entry[1..9]
                    .try_into()
                    .map_err(|_| CoreError::invalid_header("short field entry"))?,
            ) as usize;
            let name_len = entry[9] as usize;

            if offset + name_len > total_len {
                return Err(CoreError::invalid_header("field name overruns header"));
            }
            let name_bytes = file.read_at(offset, name_len)?;
            offset += name_len;
            let name = String::from_utf8(name_bytes)
                .map_err(|_| CoreError::invalid_header("field name is not UTF-8"))?;

            let field = FieldDef::new(field_type, value_len, name);
            field.validate()?;
            fields.push(field);
        }

        if offset != total_len {
            return Err(CoreError::invalid_header(format!(
                "consumed {offset} bytes, header declares {total_len}"
            )));
        }

        let header = Self::new(fields)?;
        debug_assert_eq!(header.total_len, total_len);
        Ok(header)
    }
}
