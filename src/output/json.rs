//! JSON output format.

use crate::memo::MemoStore;
use crate::parser::{FieldDescriptor, Record, Value};
use crate::table::Table;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::io::Write;

/// Whole-table JSON document.
#[derive(Serialize)]
pub struct JsonOutput<'a> {
    pub fields: &'a [FieldDescriptor],
    pub records: Vec<JsonRecord<'a>>,
    pub metadata: JsonMetadata,
}

#[derive(Serialize)]
pub struct JsonMetadata {
    pub record_count: usize,
    pub field_count: usize,
    pub last_update: Option<String>,
    pub source_format: &'static str,
}

#[derive(Serialize)]
pub struct JsonRecord<'a> {
    pub deleted: bool,
    pub values: RecordValues<'a>,
}

/// Field name to value, in column order. Memo references are resolved to
/// their text.
pub struct RecordValues<'a> {
    fields: &'a [FieldDescriptor],
    record: &'a Record,
    memo: Option<&'a MemoStore>,
}

impl Serialize for RecordValues<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (field, value) in self.fields.iter().zip(self.record.values()) {
            match value {
                Value::Memo(index) => {
                    let text = index
                        .and_then(|i| self.memo.and_then(|store| store.get(i)))
                        .map(|block| block.text());
                    map.serialize_entry(&field.name, &text)?;
                }
                other => map.serialize_entry(&field.name, other)?,
            }
        }
        map.end()
    }
}

impl<'a> JsonOutput<'a> {
    pub fn new(table: &'a Table, include_deleted: bool) -> Self {
        let records: Vec<_> = table
            .records()
            .iter()
            .filter(|r| include_deleted || r.is_live())
            .map(|record| JsonRecord {
                deleted: record.deleted,
                values: RecordValues {
                    fields: table.fields(),
                    record,
                    memo: table.memo_store(),
                },
            })
            .collect();

        let last_update = table
            .header()
            .and_then(|h| h.last_update_date())
            .map(|d| d.format("%Y-%m-%d").to_string());

        Self {
            fields: table.fields(),
            metadata: JsonMetadata {
                record_count: records.len(),
                field_count: table.field_count(),
                last_update,
                source_format: "dbase_iv",
            },
            records,
        }
    }
}

/// Write a table as JSON to a writer.
pub fn write_json<W: Write>(
    table: &Table,
    writer: W,
    pretty: bool,
    include_deleted: bool,
) -> Result<(), serde_json::Error> {
    let output = JsonOutput::new(table, include_deleted);
    if pretty {
        serde_json::to_writer_pretty(writer, &output)
    } else {
        serde_json::to_writer(writer, &output)
    }
}

/// Write a table as a JSON string.
pub fn to_json_string(
    table: &Table,
    pretty: bool,
    include_deleted: bool,
) -> Result<String, serde_json::Error> {
    let output = JsonOutput::new(table, include_deleted);
    if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new();
        table.add_field("NAME", 'C', 8).unwrap();
        table.add_field("QTY", 'I', 4).unwrap();
        table.add_field("OK", 'L', 1).unwrap();
        table.add_field("NOTE", 'M', 10).unwrap();

        let r = table.create_record();
        let record = table.record_mut(r).unwrap();
        record.write_string(0, "bolt").unwrap();
        record.write_int(1, 40).unwrap();
        record.write_bool(2, true).unwrap();
        table.write_memo(r, 3, "zinc plated").unwrap();

        let r = table.create_record();
        table.record_mut(r).unwrap().write_string(0, "gone").unwrap();
        table.delete_record(r).unwrap();
        table
    }

    #[test]
    fn test_json_shape() {
        let json = to_json_string(&sample(), false, false).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(doc["fields"][0]["name"], "NAME");
        assert_eq!(doc["fields"][0]["type"], "character");
        assert_eq!(doc["fields"][1]["length"], 4);
        assert_eq!(doc["metadata"]["record_count"], 1);
        assert_eq!(doc["metadata"]["field_count"], 4);
        assert_eq!(doc["metadata"]["source_format"], "dbase_iv");
        assert!(doc["metadata"]["last_update"].is_null());

        let values = &doc["records"][0]["values"];
        assert_eq!(doc["records"][0]["deleted"], false);
        assert_eq!(values["NAME"], "bolt");
        assert_eq!(values["QTY"], 40);
        assert_eq!(values["OK"], true);
        assert_eq!(values["NOTE"], "zinc plated");
    }

    #[test]
    fn test_json_include_deleted() {
        let json = to_json_string(&sample(), true, true).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(doc["records"].as_array().unwrap().len(), 2);
        assert_eq!(doc["records"][1]["deleted"], true);
        assert!(doc["records"][1]["values"]["NOTE"].is_null());
        assert!(doc["records"][1]["values"]["OK"].is_null());
    }

    #[test]
    fn test_values_keep_column_order() {
        let json = to_json_string(&sample(), false, false).unwrap();
        let name = json.find("\"NAME\":").unwrap();
        let qty = json.find("\"QTY\":").unwrap();
        let note = json.find("\"NOTE\":").unwrap();
        assert!(name < qty && qty < note);
    }
}
