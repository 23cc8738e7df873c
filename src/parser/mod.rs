//! Binary codecs for the dBASE IV table format.

pub mod endian;
mod error;
mod field;
mod header;
mod record;

pub use error::*;
pub use field::*;
pub use header::*;
pub use record::*;
