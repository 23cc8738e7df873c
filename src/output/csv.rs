//! CSV output format.

use crate::parser::Value;
use crate::table::Table;
use std::borrow::Cow;
use std::io::{self, Write};

/// Write a table as CSV to a writer.
///
/// Format: deleted,<field names...>
pub fn write_csv<W: Write>(table: &Table, mut writer: W, include_deleted: bool) -> io::Result<()> {
    // Header
    write!(writer, "deleted")?;
    for field in table.fields() {
        write!(writer, ",{}", quote(&field.name))?;
    }
    writeln!(writer)?;

    let memo = table.memo_store();
    for record in table.records() {
        if record.deleted && !include_deleted {
            continue;
        }

        write!(writer, "{}", record.deleted)?;
        for value in record.values() {
            let text: Cow<'_, str> = match value {
                Value::String(s) => Cow::Borrowed(s),
                Value::Float(v) => Cow::Owned(v.to_string()),
                Value::Integer(v) => Cow::Owned(v.to_string()),
                Value::Logical(Some(v)) => Cow::Owned(v.to_string()),
                Value::Logical(None) => Cow::Borrowed(""),
                Value::Memo(index) => index
                    .and_then(|i| memo.and_then(|store| store.get(i)))
                    .map(|block| block.text())
                    .unwrap_or_default(),
            };
            write!(writer, ",{}", quote(&text))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

/// Write a table as a CSV string.
pub fn to_csv_string(table: &Table, include_deleted: bool) -> io::Result<String> {
    let mut buf = Vec::new();
    write_csv(table, &mut buf, include_deleted)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn quote(text: &str) -> Cow<'_, str> {
    if text.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", text.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(text)
    }
}
