//! Error type shared by every codec and the table manager.

use thiserror::Error;

/// Errors that can occur while reading, editing or writing a table.
#[derive(Error, Debug)]
pub enum DbfError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not a dBASE IV table: version flags 0x{flags:02X}")]
    FormatMismatch { flags: u8 },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Table declares no records")]
    EmptyTable,

    #[error("Operation not allowed: {0}")]
    NotAllowed(String),

    #[error("Index {index} out of range (length {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Memory allocation failed")]
    AllocationFailure,

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl DbfError {
    /// The file is readable but is not in the dBASE IV format.
    pub fn is_format_mismatch(&self) -> bool {
        matches!(self, DbfError::FormatMismatch { .. })
    }

    /// The underlying file operation failed.
    pub fn is_io(&self) -> bool {
        matches!(self, DbfError::Io(_))
    }

    /// The file claims to be dBASE IV but its content is malformed.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, DbfError::Parse(_))
    }
}

impl From<std::collections::TryReserveError> for DbfError {
    fn from(_: std::collections::TryReserveError) -> Self {
        DbfError::AllocationFailure
    }
}

pub type Result<T> = std::result::Result<T, DbfError>;
