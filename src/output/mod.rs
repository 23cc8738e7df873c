//! Output format writers.

mod json;
mod csv;

pub use self::json::*;
pub use self::csv::*;
