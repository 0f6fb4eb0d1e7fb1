//! Pipeline error types
//!
//! Every stage classifies its failures into one of these variants, logs
//! them, and returns them to the task graph. Retrying is the graph's job.

use thiserror::Error;

/// Result type alias for pipeline operations
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Classified pipeline failure
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Connect or query failure against the source store
    #[error("Source store error: {0}")]
    SourceStore(#[source] sqlx::Error),

    /// Connect, query or write failure against the target store
    #[error("Target store error: {0}")]
    TargetStore(#[source] sqlx::Error),

    /// HTTP failure (connect, timeout, body read)
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The columnar file could not be read or decoded
    #[error("File read error: {0}")]
    FileRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(#[from] sdp_common::SdpError),

    /// A source column whose type has no dataset mapping
    #[error("Column '{column}' has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    /// Invalid task graph definition
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl PipelineError {
    pub fn file_read(message: impl Into<String>) -> Self {
        Self::FileRead(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn graph(message: impl Into<String>) -> Self {
        Self::Graph(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Classify a failure against the source store
    pub fn source_store(err: sqlx::Error) -> Self {
        if is_decode_failure(&err) {
            Self::Unexpected(err.to_string())
        } else {
            Self::SourceStore(err)
        }
    }

    /// Classify a failure against the target store
    pub fn target_store(err: sqlx::Error) -> Self {
        if is_decode_failure(&err) {
            Self::Unexpected(err.to_string())
        } else {
            Self::TargetStore(err)
        }
    }

    pub fn unsupported_type(column: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            column: column.into(),
            type_name: type_name.into(),
        }
    }

    /// Short classification used in log fields and run reports
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::SourceStore(_) => "source_store",
            PipelineError::TargetStore(_) => "target_store",
            PipelineError::Transport(_) => "transport",
            PipelineError::FileRead(_) => "file_read",
            PipelineError::Config(_) => "config",
            PipelineError::Dataset(_) => "dataset",
            PipelineError::UnsupportedType { .. } => "unsupported_type",
            PipelineError::Graph(_) => "graph",
            PipelineError::Unexpected(_) => "unexpected",
        }
    }
}

/// Failures raised on our side while reading rows, not by the store
fn is_decode_failure(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Decode(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::TypeNotFound { .. }
    )
}

impl From<parquet::errors::ParquetError> for PipelineError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        Self::FileRead(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for PipelineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::FileRead(err.to_string())
    }
}

impl From<tokio::task::JoinError> for PipelineError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Unexpected(format!("task failed to complete: {}", err))
    }
}
