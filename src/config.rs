//! Load and save options.

use crate::parser::{DbfError, Result};
use serde::Deserialize;
use std::path::Path;

/// Options that tune how tables are decoded and encoded.
///
/// Can be read from a JSON file; missing keys fall back to the defaults.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableOptions {
    /// Block size used for memo files created from scratch.
    pub memo_block_size: u16,
    /// Digits after the decimal point when writing float fields.
    pub float_precision: usize,
    /// Fail a load when the header's record length disagrees with the
    /// field widths instead of logging a warning.
    pub strict_record_length: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            memo_block_size: 512,
            float_precision: 5,
            strict_record_length: false,
        }
    }
}

impl TableOptions {
    pub const MIN_MEMO_BLOCK_SIZE: u16 = 16;
    pub const MAX_FLOAT_PRECISION: usize = 15;

    pub fn from_json(json: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.memo_block_size < Self::MIN_MEMO_BLOCK_SIZE {
            return Err(DbfError::InvalidArgument(format!(
                "memo block size {} is below the minimum of {}",
                self.memo_block_size,
                Self::MIN_MEMO_BLOCK_SIZE
            )));
        }
        if self.float_precision > Self::MAX_FLOAT_PRECISION {
            return Err(DbfError::InvalidArgument(format!(
                "float precision {} exceeds {}",
                self.float_precision,
                Self::MAX_FLOAT_PRECISION
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = TableOptions::default();
        assert_eq!(options.memo_block_size, 512);
        assert_eq!(options.float_precision, 5);
        assert!(!options.strict_record_length);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let options = TableOptions::from_json(r#"{ "float_precision": 2 }"#).unwrap();
        assert_eq!(options.float_precision, 2);
        assert_eq!(options.memo_block_size, 512);
    }

    #[test]
    fn test_rejects_tiny_block() {
        let err = TableOptions::from_json(r#"{ "memo_block_size": 8 }"#).unwrap_err();
        assert!(matches!(err, DbfError::InvalidArgument(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = TableOptions::from_json("{ nope").unwrap_err();
        assert!(matches!(err, DbfError::Config(_)));
    }
}
