//! Error types for SDP

use thiserror::Error;

use crate::dataset::ColumnType;

/// Result type alias for SDP operations
pub type Result<T> = std::result::Result<T, SdpError>;

/// Main error type for SDP
#[derive(Error, Debug)]
pub enum SdpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Column '{column}' has {actual} values, expected {expected}")]
    ColumnLength {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("Duplicate column name: {0}")]
    DuplicateColumn(String),

    #[error("Column '{column}' is {expected} but row {row} holds a {actual} value")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: ColumnType,
        row: usize,
    },

    #[error("Row has {actual} values but the dataset has {expected} columns")]
    RowArity { expected: usize, actual: usize },

    #[error("Payload is not tabular: {0}")]
    NotTabular(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SdpError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a not-tabular error
    pub fn not_tabular(message: impl Into<String>) -> Self {
        Self::NotTabular(message.into())
    }
}
