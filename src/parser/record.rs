//! Fixed-width records.
//!
//! Each record is one liveness marker byte followed by every field encoded
//! as text padded to its declared width. Memo fields hold a block index into
//! the memo store, either as 4 raw bytes or as decimal text.

use super::error::{DbfError, Result};
use super::field::{clip_to_boundary, FieldDescriptor, ValueKind};
use crate::config::TableOptions;
use crate::memo::MemoStore;
use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use tracing::warn;

pub const RECORD_LIVE: u8 = 0x20;
pub const RECORD_DELETED: u8 = 0x2A;
pub const END_OF_TABLE: u8 = 0x1A;

/// Width at which a memo reference is stored as a binary `u32`.
pub const BINARY_MEMO_WIDTH: u8 = 4;

/// One field value, tagged by the field's value kind.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Float(f64),
    /// `None` is the unset (`?`) state.
    Logical(Option<bool>),
    Integer(i32),
    /// Block index into the memo store.
    Memo(Option<u32>),
}

impl Value {
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::String => Value::String(String::new()),
            ValueKind::Float => Value::Float(0.0),
            ValueKind::Logical => Value::Logical(None),
            ValueKind::Integer => Value::Integer(0),
            ValueKind::Memo => Value::Memo(None),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::String(_) => ValueKind::String,
            Value::Float(_) => ValueKind::Float,
            Value::Logical(_) => ValueKind::Logical,
            Value::Integer(_) => ValueKind::Integer,
            Value::Memo(_) => ValueKind::Memo,
        }
    }
}

/// A table row.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub deleted: bool,
    values: Vec<Value>,
}

impl Record {
    /// A live record with every slot zero-valued for its field.
    pub fn empty(fields: &[FieldDescriptor]) -> Self {
        Self {
            deleted: false,
            values: fields.iter().map(|f| Value::default_for(f.kind())).collect(),
        }
    }

    /// All values in column order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Value of one column, whatever its kind.
    pub fn value(&self, field: usize) -> Result<&Value> {
        self.values.get(field).ok_or(DbfError::OutOfRange {
            index: field,
            len: self.values.len(),
        })
    }

    fn value_mut(&mut self, field: usize, expected: ValueKind) -> Result<&mut Value> {
        let len = self.values.len();
        let value = self
            .values
            .get_mut(field)
            .ok_or(DbfError::OutOfRange { index: field, len })?;
        if value.kind() != expected {
            return Err(mismatch(expected, value.kind()));
        }
        Ok(value)
    }

    /// Not soft-deleted.
    pub fn is_live(&self) -> bool {
        !self.deleted
    }

    /// Logical value; `None` when unset.
    pub fn read_bool(&self, field: usize) -> Result<Option<bool>> {
        match self.value(field)? {
            Value::Logical(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Logical, other.kind())),
        }
    }

    /// Float value of a `N`, `F` or `Y` column.
    pub fn read_double(&self, field: usize) -> Result<f64> {
        match self.value(field)? {
            Value::Float(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Float, other.kind())),
        }
    }

    pub fn read_int(&self, field: usize) -> Result<i32> {
        match self.value(field)? {
            Value::Integer(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Integer, other.kind())),
        }
    }

    /// Text of a character or date column, without trailing spaces.
    pub fn read_string(&self, field: usize) -> Result<&str> {
        match self.value(field)? {
            Value::String(v) => Ok(v),
            other => Err(mismatch(ValueKind::String, other.kind())),
        }
    }

    /// Memo block referenced by a memo column, if any.
    pub fn memo_index(&self, field: usize) -> Result<Option<u32>> {
        match self.value(field)? {
            Value::Memo(v) => Ok(*v),
            other => Err(mismatch(ValueKind::Memo, other.kind())),
        }
    }

    /// Set a logical column.
    pub fn write_bool(&mut self, field: usize, value: bool) -> Result<()> {
        *self.value_mut(field, ValueKind::Logical)? = Value::Logical(Some(value));
        Ok(())
    }

    /// Reset a logical column to unset (`?`).
    pub fn clear_bool(&mut self, field: usize) -> Result<()> {
        *self.value_mut(field, ValueKind::Logical)? = Value::Logical(None);
        Ok(())
    }

    /// Set a float column.
    pub fn write_double(&mut self, field: usize, value: f64) -> Result<()> {
        *self.value_mut(field, ValueKind::Float)? = Value::Float(value);
        Ok(())
    }

    /// Set an integer column.
    pub fn write_int(&mut self, field: usize, value: i32) -> Result<()> {
        *self.value_mut(field, ValueKind::Integer)? = Value::Integer(value);
        Ok(())
    }

    /// Set a character or date column.
    ///
    /// The value is stored the way it reads back from disk: cut at the first
    /// NUL and stripped of trailing spaces.
    pub fn write_string(&mut self, field: usize, value: impl Into<String>) -> Result<()> {
        let slot = self.value_mut(field, ValueKind::String)?;
        let mut value = value.into();
        if let Some(nul) = value.find('\0') {
            value.truncate(nul);
        }
        value.truncate(value.trim_end_matches(' ').len());
        *slot = Value::String(value);
        Ok(())
    }

    pub(crate) fn set_memo_index(&mut self, field: usize, index: Option<u32>) -> Result<()> {
        *self.value_mut(field, ValueKind::Memo)? = Value::Memo(index);
        Ok(())
    }
}

fn mismatch(expected: ValueKind, actual: ValueKind) -> DbfError {
    DbfError::TypeMismatch {
        expected: expected.to_string(),
        actual: actual.to_string(),
    }
}

/// Outcome of reading one record slot.
#[derive(Debug)]
pub enum RecordRead {
    Record(Record),
    EndOfTable,
}

/// Decode a logical field byte: true, false, or unset (`?`).
pub fn parse_logical(byte: u8) -> Result<Option<bool>> {
    match byte {
        b'Y' | b'y' | b'T' | b't' => Ok(Some(true)),
        b'N' | b'n' | b'F' | b'f' => Ok(Some(false)),
        b'?' => Ok(None),
        other => Err(DbfError::Parse(format!(
            "invalid logical value '{}'",
            other.escape_ascii()
        ))),
    }
}

/// Read the next record.
///
/// `memo` must be present when any field is memo-kind.
pub fn read_record<R: Read>(
    reader: &mut R,
    fields: &[FieldDescriptor],
    memo: Option<&MemoStore>,
) -> Result<RecordRead> {
    let marker = match reader.read_u8() {
        Ok(marker) => marker,
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
            warn!("Table ended without an end-of-table marker");
            return Ok(RecordRead::EndOfTable);
        }
        Err(e) => return Err(e.into()),
    };

    let deleted = match marker {
        END_OF_TABLE => return Ok(RecordRead::EndOfTable),
        RECORD_DELETED => true,
        RECORD_LIVE => false,
        other => {
            return Err(DbfError::Parse(format!(
                "invalid record marker 0x{:02X}",
                other
            )))
        }
    };

    let mut buffer = [0u8; 256];
    let mut values = Vec::with_capacity(fields.len());

    for field in fields {
        let raw = &mut buffer[..field.length as usize];
        reader.read_exact(raw)?;
        values.push(decode_field(raw, field, memo)?);
    }

    Ok(RecordRead::Record(Record { deleted, values }))
}

fn decode_field(raw: &[u8], field: &FieldDescriptor, memo: Option<&MemoStore>) -> Result<Value> {
    let content = match raw.iter().position(|&b| b != b' ') {
        Some(start) => &raw[start..],
        None => &[][..],
    };

    let value = match field.kind() {
        ValueKind::String => {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            let text = String::from_utf8_lossy(&raw[..end]);
            Value::String(text.trim_end_matches(' ').to_string())
        }
        ValueKind::Float => {
            let text = numeric_text(content, field)?;
            if text.is_empty() {
                Value::Float(0.0)
            } else {
                Value::Float(text.parse().map_err(|_| bad_number(field, text))?)
            }
        }
        ValueKind::Logical => match content.first() {
            None | Some(0) => Value::Logical(None),
            Some(&byte) => Value::Logical(parse_logical(byte)?),
        },
        ValueKind::Integer => {
            let text = numeric_text(content, field)?;
            if text.is_empty() {
                Value::Integer(0)
            } else {
                Value::Integer(text.parse().map_err(|_| bad_number(field, text))?)
            }
        }
        ValueKind::Memo => {
            let store = memo.ok_or_else(|| {
                DbfError::Parse(format!(
                    "memo field '{}' in a table without a memo file",
                    field.name
                ))
            })?;

            let index = if content.is_empty() {
                0
            } else if field.length == BINARY_MEMO_WIDTH {
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
            } else {
                let text = numeric_text(content, field)?;
                text.parse().map_err(|_| bad_number(field, text))?
            };

            if index == 0 {
                Value::Memo(None)
            } else if store.contains(index) {
                Value::Memo(Some(index))
            } else {
                warn!(
                    "Field '{}' references missing memo block {}",
                    field.name, index
                );
                Value::Memo(None)
            }
        }
    };

    Ok(value)
}

fn numeric_text<'a>(content: &'a [u8], field: &FieldDescriptor) -> Result<&'a str> {
    std::str::from_utf8(content)
        .map(|s| s.trim_end_matches(['\0', ' ']))
        .map_err(|_| DbfError::Parse(format!("field '{}' holds non-ASCII numeric data", field.name)))
}

fn bad_number(field: &FieldDescriptor, text: &str) -> DbfError {
    DbfError::Parse(format!(
        "field '{}' ({}) cannot parse '{}'",
        field.name,
        field.kind(),
        text
    ))
}

/// Write one record, marker included.
pub fn write_record<W: Write>(
    writer: &mut W,
    fields: &[FieldDescriptor],
    record: &Record,
    options: &TableOptions,
) -> Result<()> {
    if record.values.len() != fields.len() {
        return Err(DbfError::InvalidArgument(format!(
            "record has {} values for {} fields",
            record.values.len(),
            fields.len()
        )));
    }

    writer.write_u8(if record.deleted { RECORD_DELETED } else { RECORD_LIVE })?;

    for (field, value) in fields.iter().zip(&record.values) {
        if value.kind() != field.kind() {
            return Err(mismatch(field.kind(), value.kind()));
        }

        let width = field.length as usize;
        match value {
            Value::String(s) => {
                if s.len() > width {
                    warn!("Truncating '{}' to {} bytes", field.name, width);
                }
                pad_right(writer, clip_to_boundary(s, width).as_bytes(), width)?;
            }
            Value::Float(v) => {
                let text = encode_float(*v, width, options.float_precision);
                pad_left(writer, text.as_bytes(), width, &field.name)?;
            }
            Value::Logical(v) => {
                let flag = match v {
                    Some(true) => b"T",
                    Some(false) => b"F",
                    None => b"?",
                };
                pad_left(writer, flag, width, &field.name)?;
            }
            Value::Integer(v) => {
                pad_left(writer, v.to_string().as_bytes(), width, &field.name)?;
            }
            Value::Memo(index) => {
                if field.length == BINARY_MEMO_WIDTH {
                    writer.write_all(&index.unwrap_or(0).to_le_bytes())?;
                } else {
                    let text = index.map(|i| i.to_string()).unwrap_or_default();
                    pad_left(writer, text.as_bytes(), width, &field.name)?;
                }
            }
        }
    }

    Ok(())
}

/// Format with as many decimals as fit, up to `precision`.
fn encode_float(value: f64, width: usize, precision: usize) -> String {
    (0..=precision)
        .rev()
        .map(|p| format!("{:.*}", p, value))
        .find(|text| text.len() <= width)
        .unwrap_or_else(|| format!("{:.0}", value))
}

fn pad_left<W: Write>(writer: &mut W, text: &[u8], width: usize, name: &str) -> Result<()> {
    if text.len() > width {
        warn!("Value of '{}' wider than {} bytes, truncated", name, width);
        writer.write_all(&text[..width])?;
    } else {
        writer.write_all(&vec![b' '; width - text.len()])?;
        writer.write_all(text)?;
    }
    Ok(())
}

fn pad_right<W: Write>(writer: &mut W, text: &[u8], width: usize) -> Result<()> {
    writer.write_all(text)?;
    writer.write_all(&vec![b' '; width - text.len()])?;
    Ok(())
}
