//! Memo store: the variable-length heap kept in the companion .dbt file.

mod store;

pub use store::*;
