//! SDP Pipeline Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Scheduled extract-transform-load for the sales report.
//!
//! # Overview
//!
//! Three extractors each copy one source into its own staging table in the
//! target PostgreSQL store:
//!
//! - **Relational**: `SELECT *` from a table in the source store
//! - **HTTP**: one request per employee identifier
//! - **Parquet**: a whole columnar file of categories
//!
//! Once all three have committed, the transformer joins the staging tables,
//! sums sales per day, category and employee, and appends the result to the
//! final table.
//!
//! ## Task graph
//!
//! The four units run on a [`graph::TaskGraph`] with a per-unit retry budget
//! and a cron [`graph::Trigger`] (daily, no catch-up, by default). A unit
//! that exhausts its retries leaves its dependents skipped.
//!
//! # Example
//!
//! ```no_run
//! use sdp_common::config::EnvSource;
//! use sdp_pipeline::{config::PipelineConfig, units};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let source = EnvSource::load(None)?;
//!     let config = PipelineConfig::from_source(&source)?;
//!     let graph = units::build_graph(&config)?;
//!
//!     let report = graph.run_once().await;
//!     println!("success: {}", report.is_success());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod db;
pub mod error;
pub mod graph;
pub mod sink;
pub mod stats;
pub mod transform;
pub mod units;

pub use error::{PipelineError, PipelineResult};
