//! Field descriptors (one 32-byte entry per column).

use super::error::{DbfError, Result};
use byteorder::{ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::fmt;
use std::io::{Read, Write};

/// Ends the descriptor array.
pub const FIELD_TERMINATOR: u8 = 0x0D;

/// On-disk type character of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Character,
    Date,
    Float,
    Numeric,
    Logical,
    DateTime,
    Integer,
    Currency,
    Memo,
}

impl FieldType {
    pub fn from_char(c: u8) -> Option<Self> {
        match c {
            b'C' => Some(FieldType::Character),
            b'D' => Some(FieldType::Date),
            b'F' => Some(FieldType::Float),
            b'N' => Some(FieldType::Numeric),
            b'L' => Some(FieldType::Logical),
            b'T' => Some(FieldType::DateTime),
            b'I' => Some(FieldType::Integer),
            b'Y' => Some(FieldType::Currency),
            b'M' => Some(FieldType::Memo),
            _ => None,
        }
    }

    pub fn as_char(self) -> u8 {
        match self {
            FieldType::Character => b'C',
            FieldType::Date => b'D',
            FieldType::Float => b'F',
            FieldType::Numeric => b'N',
            FieldType::Logical => b'L',
            FieldType::DateTime => b'T',
            FieldType::Integer => b'I',
            FieldType::Currency => b'Y',
            FieldType::Memo => b'M',
        }
    }

    pub fn kind(self) -> ValueKind {
        match self {
            FieldType::Character | FieldType::Date | FieldType::DateTime => ValueKind::String,
            FieldType::Float | FieldType::Numeric | FieldType::Currency => ValueKind::Float,
            FieldType::Logical => ValueKind::Logical,
            FieldType::Integer => ValueKind::Integer,
            FieldType::Memo => ValueKind::Memo,
        }
    }
}

/// Semantic type a field decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Float,
    Logical,
    Integer,
    Memo,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Float => "float",
            ValueKind::Logical => "logical",
            ValueKind::Integer => "integer",
            ValueKind::Memo => "memo",
        };
        f.write_str(name)
    }
}

/// Column metadata.
///
/// Layout:
/// ```text
/// 0   name            11 bytes, NUL padded
/// 11  type            u8 (ASCII)
/// 12  reserved        4
/// 16  length          u8
/// 17  decimal count   u8
/// 18  reserved        2
/// 20  work area id    u8
/// 21  reserved        10
/// 31  set fields flag u8
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub length: u8,
    pub decimal_count: u8,
    #[serde(skip)]
    pub work_area_id: u8,
    #[serde(skip)]
    pub set_fields_flag: u8,
}

impl FieldDescriptor {
    pub const SIZE: usize = 32;
    pub const NAME_SIZE: usize = 11;
    /// Longest name that still leaves room for a terminating NUL.
    pub const MAX_NAME_LEN: usize = 10;

    pub fn new(name: &str, field_type: FieldType, length: u8) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            length,
            decimal_count: 0,
            work_area_id: 0,
            set_fields_flag: 0,
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.field_type.kind()
    }

    /// Read one descriptor. `None` means the terminator byte was found.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut name = [0u8; Self::NAME_SIZE];
        name[0] = reader.read_u8()?;
        if name[0] == FIELD_TERMINATOR {
            return Ok(None);
        }
        reader.read_exact(&mut name[1..])?;

        let type_char = reader.read_u8()?;
        skip(reader, 4)?;
        let length = reader.read_u8()?;
        let decimal_count = reader.read_u8()?;
        skip(reader, 2)?;
        let work_area_id = reader.read_u8()?;
        skip(reader, 10)?;
        let set_fields_flag = reader.read_u8()?;

        let field_type = FieldType::from_char(type_char).ok_or_else(|| {
            DbfError::Parse(format!(
                "unrecognised field type '{}' (0x{:02X})",
                type_char.escape_ascii(),
                type_char
            ))
        })?;

        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let name = String::from_utf8_lossy(&name[..end]).trim_end().to_string();

        Ok(Some(Self {
            name,
            field_type,
            length,
            decimal_count,
            work_area_id,
            set_fields_flag,
        }))
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut name = [0u8; Self::NAME_SIZE];
        let encoded = clip_to_boundary(&self.name, Self::MAX_NAME_LEN);
        name[..encoded.len()].copy_from_slice(encoded.as_bytes());

        writer.write_all(&name)?;
        writer.write_u8(self.field_type.as_char())?;
        writer.write_all(&[0u8; 4])?;
        writer.write_u8(self.length)?;
        writer.write_u8(self.decimal_count)?;
        writer.write_all(&[0u8; 2])?;
        writer.write_u8(self.work_area_id)?;
        writer.write_all(&[0u8; 10])?;
        writer.write_u8(self.set_fields_flag)?;
        Ok(())
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub(crate) fn clip_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn skip<R: Read>(reader: &mut R, count: usize) -> Result<()> {
    let mut trash = [0u8; 16];
    reader.read_exact(&mut trash[..count])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_type_mapping() {
        let expect = [
            (b'C', ValueKind::String),
            (b'D', ValueKind::String),
            (b'T', ValueKind::String),
            (b'F', ValueKind::Float),
            (b'N', ValueKind::Float),
            (b'Y', ValueKind::Float),
            (b'L', ValueKind::Logical),
            (b'I', ValueKind::Integer),
            (b'M', ValueKind::Memo),
        ];
        for (c, kind) in expect {
            let ty = FieldType::from_char(c).unwrap();
            assert_eq!(ty.kind(), kind);
            assert_eq!(ty.as_char(), c);
        }
        assert!(FieldType::from_char(b'B').is_none());
    }

    #[test]
    fn test_write_layout() {
        let mut desc = FieldDescriptor::new("ID", FieldType::Numeric, 10);
        desc.work_area_id = 7;
        desc.set_fields_flag = 1;
        let mut buf = Vec::new();
        desc.write_to(&mut buf).unwrap();

        assert_eq!(buf.len(), FieldDescriptor::SIZE);
        assert_eq!(&buf[..2], b"ID");
        assert!(buf[2..11].iter().all(|&b| b == 0));
        assert_eq!(buf[11], b'N');
        assert_eq!(buf[16], 10);
        assert_eq!(buf[20], 7);
        assert_eq!(buf[31], 1);
    }

    #[test]
    fn test_read_back() {
        let desc = FieldDescriptor::new("NAME", FieldType::Character, 24);
        let mut buf = Vec::new();
        desc.write_to(&mut buf).unwrap();

        let read = FieldDescriptor::read_from(&mut Cursor::new(buf)).unwrap().unwrap();
        assert_eq!(read, desc);
    }

    #[test]
    fn test_terminator() {
        let mut cursor = Cursor::new(vec![FIELD_TERMINATOR, 0x20]);
        assert!(FieldDescriptor::read_from(&mut cursor).unwrap().is_none());
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn test_unknown_type_is_parse_error() {
        let mut buf = Vec::new();
        FieldDescriptor::new("X", FieldType::Character, 1).write_to(&mut buf).unwrap();
        buf[11] = b'Q';
        let err = FieldDescriptor::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.is_corrupt());
    }

    #[test]
    fn test_long_name_clipped_on_encode() {
        let desc = FieldDescriptor::new("DESCRIPTION_LONG", FieldType::Character, 8);
        let mut buf = Vec::new();
        desc.write_to(&mut buf).unwrap();
        assert_eq!(&buf[..10], b"DESCRIPTIO");
        assert_eq!(buf[10], 0);
        assert_eq!(desc.name, "DESCRIPTION_LONG");
    }

    #[test]
    fn test_clip_respects_char_boundary() {
        assert_eq!(clip_to_boundary("héllo", 2), "h");
        assert_eq!(clip_to_boundary("abc", 10), "abc");
    }
}
