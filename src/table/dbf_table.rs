//! The in-memory table: header, schema, records and memo store as one unit.

use super::file::{memo_path_for, table_path_for, AtomicFile};
use crate::config::TableOptions;
use crate::memo::{MemoBlock, MemoStore};
use crate::parser::{
    read_record, write_record, DbfError, FieldDescriptor, FieldType, Record, RecordRead, Result,
    TableHeader, ValueKind, BINARY_MEMO_WIDTH, END_OF_TABLE, FIELD_TERMINATOR,
};
use byteorder::WriteBytesExt;
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Most columns a table can declare (8-bit count).
pub const MAX_FIELDS: usize = 255;

/// A fully materialized dBASE IV table.
#[derive(Debug, Clone)]
pub struct Table {
    header: Option<TableHeader>,
    fields: Vec<FieldDescriptor>,
    records: Vec<Record>,
    memo: Option<MemoStore>,
    options: TableOptions,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    /// An empty table with no fields.
    pub fn new() -> Self {
        Self {
            header: None,
            fields: Vec::new(),
            records: Vec::new(),
            memo: None,
            options: TableOptions::default(),
        }
    }

    pub fn with_options(options: TableOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            ..Self::new()
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with(path, TableOptions::default())
    }

    /// Read a table and, when its header says so, the companion memo file.
    pub fn load_with(path: &Path, options: TableOptions) -> Result<Self> {
        options.validate()?;

        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let header = TableHeader::read_raw(&mut reader)?;
        let has_records = match header.validate() {
            Ok(()) => true,
            Err(DbfError::EmptyTable) => {
                debug!("{} declares no records", path.display());
                false
            }
            Err(e) => return Err(e),
        };

        let memo = if header.has_memo() {
            Some(MemoStore::load(&memo_path_for(path))?)
        } else {
            None
        };

        let fields = read_fields(&mut reader, &header)?;

        let expected_len = 1 + fields.iter().map(|f| f.length as usize).sum::<usize>();
        let record_len = header.record_len as usize;
        if record_len < expected_len {
            return Err(DbfError::Parse(format!(
                "header record length {} is shorter than the field widths ({})",
                header.record_len, expected_len
            )));
        }
        let record_padding = (record_len - expected_len) as u64;
        if record_padding > 0 {
            if options.strict_record_length {
                return Err(DbfError::Parse(format!(
                    "header record length {} does not match field widths ({})",
                    header.record_len, expected_len
                )));
            }
            warn!(
                "Header record length {} exceeds field widths ({}), skipping {} bytes per record",
                header.record_len, expected_len, record_padding
            );
        }

        let mut records = Vec::new();
        if has_records {
            let declared = header.record_count as usize;
            let available = file_len.saturating_sub(header.header_len as u64) / record_len as u64;
            records.try_reserve(declared.min(available as usize))?;

            while records.len() < declared {
                match read_record(&mut reader, &fields, memo.as_ref())? {
                    RecordRead::Record(record) => records.push(record),
                    RecordRead::EndOfTable => break,
                }
                if record_padding > 0 {
                    // A short skip leaves the reader at end of file, which the
                    // next read reports as end of table.
                    io::copy(&mut reader.by_ref().take(record_padding), &mut io::sink())?;
                }
            }

            if records.len() < declared {
                warn!(
                    "Header declares {} records, found {}",
                    declared,
                    records.len()
                );
            }
        }

        info!(
            "Loaded {}: {} fields, {} records{}",
            path.display(),
            fields.len(),
            records.len(),
            if memo.is_some() { ", memo file attached" } else { "" }
        );

        Ok(Self {
            header: Some(header),
            fields,
            records,
            memo,
            options,
        })
    }

    /// Write the table (and its memo file, if any). Returns the path of the
    /// table file, which gains a `.dbf` extension when it had none.
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let table_path = table_path_for(path);
        let header = self.build_header()?;

        let mut out = AtomicFile::create(&table_path)?;
        header.write_to(&mut out)?;
        for field in &self.fields {
            field.write_to(&mut out)?;
        }
        out.write_u8(FIELD_TERMINATOR)?;

        if let Some(memo) = &self.memo {
            let memo_path = memo_path_for(&table_path);
            let mut memo_out = AtomicFile::create(&memo_path)?;
            memo.write_to(&mut memo_out)?;
            memo_out.commit()?;
            debug!("Wrote memo file {} ({} blocks)", memo_path.display(), memo.len());
        }

        for record in &self.records {
            write_record(&mut out, &self.fields, record, &self.options)?;
        }
        out.write_u8(END_OF_TABLE)?;
        out.commit()?;

        info!(
            "Saved {}: {} fields, {} records",
            table_path.display(),
            self.fields.len(),
            self.records.len()
        );

        Ok(table_path)
    }

    fn build_header(&self) -> Result<TableHeader> {
        let record_count = i32::try_from(self.records.len()).map_err(|_| {
            DbfError::InvalidArgument(format!("{} records exceed the format limit", self.records.len()))
        })?;

        let header_len = TableHeader::SIZE + FieldDescriptor::SIZE * self.fields.len() + 1;
        let record_len = 1 + self.fields.iter().map(|f| f.length as usize).sum::<usize>();
        let header_len = u16::try_from(header_len)
            .map_err(|_| DbfError::InvalidArgument("too many fields".to_string()))?;
        let record_len = u16::try_from(record_len).map_err(|_| {
            DbfError::InvalidArgument(format!("record length {} exceeds 65535 bytes", record_len))
        })?;

        let today = chrono::Local::now().date_naive();
        Ok(TableHeader::new(
            record_count,
            header_len,
            record_len,
            self.memo.is_some(),
            today,
        ))
    }

    /// Append a column. Only allowed while the table holds no records.
    ///
    /// Names must be 1 to 10 ASCII bytes without NUL or trailing spaces, and
    /// unique ignoring case.
    pub fn add_field(&mut self, name: &str, type_char: char, width: u8) -> Result<usize> {
        if !self.records.is_empty() {
            return Err(DbfError::NotAllowed(
                "schema is frozen once records exist".to_string(),
            ));
        }
        if name.is_empty() {
            return Err(DbfError::InvalidArgument("field name is empty".to_string()));
        }
        if name.len() > FieldDescriptor::MAX_NAME_LEN {
            return Err(DbfError::InvalidArgument(format!(
                "field name '{}' is longer than {} bytes",
                name,
                FieldDescriptor::MAX_NAME_LEN
            )));
        }
        if !name.is_ascii() || name.contains('\0') || name.trim_end() != name {
            return Err(DbfError::InvalidArgument(format!(
                "field name {:?} must be ASCII without NUL bytes or trailing spaces",
                name
            )));
        }
        if self.fields.iter().any(|f| f.name.eq_ignore_ascii_case(name)) {
            return Err(DbfError::InvalidArgument(format!(
                "field '{}' already exists",
                name
            )));
        }
        if width == 0 {
            return Err(DbfError::InvalidArgument(format!("field '{}' has zero width", name)));
        }
        if self.fields.len() >= MAX_FIELDS {
            return Err(DbfError::InvalidArgument(format!(
                "a table holds at most {} fields",
                MAX_FIELDS
            )));
        }

        let field_type = u8::try_from(type_char.to_ascii_uppercase())
            .ok()
            .and_then(FieldType::from_char)
            .ok_or_else(|| DbfError::InvalidArgument(format!("unknown field type '{}'", type_char)))?;

        if field_type.kind() == ValueKind::Memo {
            if width != BINARY_MEMO_WIDTH && width != 10 {
                return Err(DbfError::InvalidArgument(format!(
                    "memo field '{}' must be 4 or 10 bytes wide",
                    name
                )));
            }
            if self.memo.is_none() {
                self.memo = Some(MemoStore::new(self.options.memo_block_size)?);
            }
        }

        self.fields.push(FieldDescriptor::new(name, field_type, width));
        Ok(self.fields.len() - 1)
    }

    /// Remove a column. Only allowed while the table holds no records.
    pub fn remove_field(&mut self, index: usize) -> Result<()> {
        if !self.records.is_empty() {
            return Err(DbfError::NotAllowed(
                "schema is frozen once records exist".to_string(),
            ));
        }
        if index >= self.fields.len() {
            return Err(DbfError::OutOfRange {
                index,
                len: self.fields.len(),
            });
        }

        self.fields.remove(index);

        let memo_unused = !self.fields.iter().any(|f| f.kind() == ValueKind::Memo);
        if memo_unused && self.memo.as_ref().is_some_and(MemoStore::is_empty) {
            self.memo = None;
        }
        Ok(())
    }

    /// Attach an empty memo store if the table has none.
    pub fn attach_memo_store(&mut self, block_size: u16) -> Result<()> {
        if self.memo.is_none() {
            self.memo = Some(MemoStore::new(block_size)?);
        }
        Ok(())
    }

    /// Append a live, zero-valued record and return its index.
    pub fn create_record(&mut self) -> usize {
        self.records.push(Record::empty(&self.fields));
        self.records.len() - 1
    }

    /// Soft-delete: the record keeps its index and is written with the
    /// deleted marker.
    pub fn delete_record(&mut self, index: usize) -> Result<()> {
        self.record_mut(index)?.deleted = true;
        Ok(())
    }

    pub fn record(&self, index: usize) -> Result<&Record> {
        self.records.get(index).ok_or(DbfError::OutOfRange {
            index,
            len: self.records.len(),
        })
    }

    pub fn record_mut(&mut self, index: usize) -> Result<&mut Record> {
        let len = self.records.len();
        self.records
            .get_mut(index)
            .ok_or(DbfError::OutOfRange { index, len })
    }

    /// First field whose name starts or ends with `name`, ignoring case.
    pub fn find_field_index(&self, name: &str) -> Result<usize> {
        if name.is_empty() {
            return Err(DbfError::InvalidArgument("empty field name".to_string()));
        }
        let query = name.as_bytes();
        self.fields
            .iter()
            .position(|f| {
                let field = f.name.as_bytes();
                field.len() >= query.len()
                    && (field[..query.len()].eq_ignore_ascii_case(query)
                        || field[field.len() - query.len()..].eq_ignore_ascii_case(query))
            })
            .ok_or_else(|| DbfError::NotFound(format!("field matching '{}'", name)))
    }

    /// Field whose name equals `name`, ignoring case.
    pub fn field_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| DbfError::NotFound(format!("field '{}'", name)))
    }

    pub fn read_memo(&self, record: usize, field: usize) -> Result<Option<Cow<'_, str>>> {
        Ok(self.memo_block(record, field)?.map(MemoBlock::text))
    }

    pub fn read_memo_bytes(&self, record: usize, field: usize) -> Result<Option<&[u8]>> {
        Ok(self.memo_block(record, field)?.map(MemoBlock::payload))
    }

    fn memo_block(&self, record: usize, field: usize) -> Result<Option<&MemoBlock>> {
        let store = self.memo.as_ref().ok_or_else(no_memo_store)?;
        let index = self.record(record)?.memo_index(field)?;
        Ok(index.and_then(|i| store.get(i)))
    }

    /// Store `text` as the memo of `field`, returning the block index it
    /// ended up in.
    pub fn write_memo(&mut self, record: usize, field: usize, text: &str) -> Result<u32> {
        let store = self.memo.as_mut().ok_or_else(no_memo_store)?;
        let len = self.records.len();
        let record = self
            .records
            .get_mut(record)
            .ok_or(DbfError::OutOfRange { index: record, len })?;

        let existing = record.memo_index(field)?;
        let index = store.store(existing, text.as_bytes().to_vec())?;
        record.set_memo_index(field, Some(index))?;
        Ok(index)
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Result<&FieldDescriptor> {
        self.fields.get(index).ok_or(DbfError::OutOfRange {
            index,
            len: self.fields.len(),
        })
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn live_records(&self) -> impl Iterator<Item = (usize, &Record)> {
        self.records.iter().enumerate().filter(|(_, r)| r.is_live())
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Header as read from disk; `None` for tables built in memory.
    pub fn header(&self) -> Option<&TableHeader> {
        self.header.as_ref()
    }

    pub fn memo_store(&self) -> Option<&MemoStore> {
        self.memo.as_ref()
    }

    pub fn options(&self) -> &TableOptions {
        &self.options
    }
}

fn no_memo_store() -> DbfError {
    DbfError::TypeMismatch {
        expected: "table with a memo file".to_string(),
        actual: "table without a memo file".to_string(),
    }
}

/// Read descriptors up to the terminator, then skip whatever the header
/// length still covers.
fn read_fields<R: Read>(reader: &mut R, header: &TableHeader) -> Result<Vec<FieldDescriptor>> {
    // One slot is the header itself; it doubles as room for the terminator.
    let slots = (header.header_len as usize / FieldDescriptor::SIZE).min(MAX_FIELDS);
    if slots < 1 {
        return Err(DbfError::Parse(format!(
            "header length {} leaves no room for field descriptors",
            header.header_len
        )));
    }

    let mut fields = Vec::with_capacity(slots);
    let mut consumed = TableHeader::SIZE;
    for _ in 0..slots {
        match FieldDescriptor::read_from(reader)? {
            Some(field) => {
                consumed += FieldDescriptor::SIZE;
                fields.push(field);
            }
            None => {
                consumed += 1;
                break;
            }
        }
    }

    let padding = (header.header_len as usize).saturating_sub(consumed) as u64;
    if padding > 0 {
        let skipped = io::copy(&mut reader.by_ref().take(padding), &mut io::sink())?;
        if skipped < padding {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file ends inside the table header",
            )
            .into());
        }
        debug!("Skipped {} bytes of header padding", padding);
    }

    Ok(fields)
}
