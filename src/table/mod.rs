//! Whole-table load, edit and save.

mod dbf_table;
mod file;

pub use dbf_table::*;
pub use file::*;
