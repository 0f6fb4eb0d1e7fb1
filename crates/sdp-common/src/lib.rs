//! SDP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, configuration access, and error handling for the SDP
//! (Sales Data Pipeline) workspace.
//!
//! # Overview
//!
//! - **Dataset**: the in-memory columnar table handed between pipeline stages
//! - **Config**: named configuration lookup (environment, `.env`, in-memory maps)
//! - **Error Handling**: shared error and result types
//! - **Logging**: tracing subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use sdp_common::dataset::{ColumnType, DatasetBuilder, Value};
//!
//! fn build() -> sdp_common::Result<()> {
//!     let mut builder = DatasetBuilder::new()
//!         .column("employee_id", ColumnType::Integer)
//!         .column("employee_name", ColumnType::Text);
//!     builder.push_row(vec![Value::Integer(1), Value::from("Alice")])?;
//!     let dataset = builder.build()?;
//!     assert_eq!(dataset.num_rows(), 1);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dataset;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use dataset::TabularDataset;
pub use error::{Result, SdpError};
