//! dBASE IV table library
//!
//! Reads and writes `.dbf` tables with their `.dbt` memo files, and exports
//! them to open formats.

pub mod config;
pub mod memo;
pub mod output;
pub mod parser;
pub mod table;

pub use config::TableOptions;
pub use memo::{MemoBlock, MemoStore};
pub use parser::{DbfError, FieldDescriptor, FieldType, Record, Value, ValueKind};
pub use table::Table;
