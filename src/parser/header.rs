//! Table header (32 bytes at the start of every .dbf file).

use super::error::{DbfError, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::io::{Read, Write};

/// Bits 0-1 of the flags byte.
pub const VERSION_MASK: u8 = 0b0000_0011;
/// dBASE IV family tag.
pub const VERSION_IV: u8 = 3;
/// Memo file present.
pub const MEMO_FLAG: u8 = 0b0100_0000;
/// Memo marker as written by dBASE IV itself (0x8B tables).
pub const MEMO_FLAG_LEGACY: u8 = 0b1000_0000;

/// Table header.
///
/// Layout (little-endian):
/// ```text
/// 0   flags            u8
/// 1   year, month, day u8 x 3 (year counted from 1900)
/// 4   record count     i32
/// 8   header length    u16
/// 10  record length    u16
/// 12  reserved         20 bytes
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TableHeader {
    pub flags: u8,
    pub last_update: [u8; 3],
    pub record_count: i32,
    pub header_len: u16,
    pub record_len: u16,
}

impl TableHeader {
    pub const SIZE: usize = 32;
    pub const RESERVED: usize = 20;

    /// Build the header for a table about to be written.
    pub fn new(record_count: i32, header_len: u16, record_len: u16, memo: bool, date: NaiveDate) -> Self {
        let mut flags = VERSION_IV;
        if memo {
            flags |= MEMO_FLAG;
        }

        Self {
            flags,
            last_update: [
                (date.year() - 1900).clamp(0, 255) as u8,
                date.month() as u8,
                date.day() as u8,
            ],
            record_count,
            header_len,
            record_len,
        }
    }

    /// Read the 32 header bytes without validating them.
    pub fn read_raw<R: Read>(reader: &mut R) -> Result<Self> {
        let flags = reader.read_u8()?;
        let mut last_update = [0u8; 3];
        reader.read_exact(&mut last_update)?;
        let record_count = reader.read_i32::<LittleEndian>()?;
        let header_len = reader.read_u16::<LittleEndian>()?;
        let record_len = reader.read_u16::<LittleEndian>()?;

        let mut reserved = [0u8; Self::RESERVED];
        reader.read_exact(&mut reserved)?;

        Ok(Self {
            flags,
            last_update,
            record_count,
            header_len,
            record_len,
        })
    }

    /// Read and validate a header.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let header = Self::read_raw(reader)?;
        header.validate()?;
        Ok(header)
    }

    /// Structural checks. `EmptyTable` is reported last so that a caller
    /// treating it as benign knows every other field is sound.
    pub fn validate(&self) -> Result<()> {
        if self.flags & VERSION_MASK != VERSION_IV {
            return Err(DbfError::FormatMismatch { flags: self.flags });
        }

        let [_, month, day] = self.last_update;
        if month > 12 || day > 31 {
            return Err(DbfError::Parse(format!(
                "implausible last-update date: month {}, day {}",
                month, day
            )));
        }

        if self.header_len < 31 {
            return Err(DbfError::Parse(format!(
                "header length {} is shorter than the fixed header",
                self.header_len
            )));
        }

        if self.record_len < 1 {
            return Err(DbfError::Parse("record length is zero".to_string()));
        }

        if self.record_count < 1 {
            return Err(DbfError::EmptyTable);
        }

        Ok(())
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(self.flags)?;
        writer.write_all(&self.last_update)?;
        writer.write_i32::<LittleEndian>(self.record_count)?;
        writer.write_u16::<LittleEndian>(self.header_len)?;
        writer.write_u16::<LittleEndian>(self.record_len)?;
        writer.write_all(&[0u8; Self::RESERVED])?;
        Ok(())
    }

    pub fn has_memo(&self) -> bool {
        self.flags & (MEMO_FLAG | MEMO_FLAG_LEGACY) != 0
    }

    /// Last-update stamp as a calendar date, if it forms one.
    pub fn last_update_date(&self) -> Option<NaiveDate> {
        let [year, month, day] = self.last_update;
        NaiveDate::from_ymd_opt(1900 + year as i32, month as u32, day as u32)
    }
}
