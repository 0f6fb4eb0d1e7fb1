//! Source connectors
//!
//! Each connector pulls one source into a [`TabularDataset`] and hands it to
//! a [`TableSink`] for its raw staging table. Connectors are [`Stage`]s, so
//! the task graph can run and retry them directly.
//!
//! [`TabularDataset`]: sdp_common::TabularDataset
//! [`TableSink`]: crate::sink::TableSink
//! [`Stage`]: crate::graph::Stage

pub mod file;
pub mod http;
pub mod relational;

pub use file::ParquetExtractor;
pub use http::{HttpExtractor, LoadStrategy};
pub use relational::RelationalExtractor;

use tracing::error;

use crate::error::PipelineError;

/// Log a classified failure before it propagates to the graph
pub(crate) fn log_failure(stage: &str, err: &PipelineError) {
    error!(stage, kind = err.kind(), error = %err, "Extraction failed");
}
