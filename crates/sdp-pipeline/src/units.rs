//! The four-unit sales graph
//!
//! ```text
//! extract_postgresql_data ─┐
//! extract_api_data ────────┼─> transform_data
//! extract_parquet_data ────┘
//! ```

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::connectors::{HttpExtractor, ParquetExtractor, RelationalExtractor};
use crate::error::PipelineResult;
use crate::graph::TaskGraph;
use crate::sink::{PostgresSink, TableSink};
use crate::transform::{StagingTables, Transformer};

pub const EXTRACT_POSTGRESQL: &str = "extract_postgresql_data";
pub const EXTRACT_API: &str = "extract_api_data";
pub const EXTRACT_PARQUET: &str = "extract_parquet_data";
pub const TRANSFORM: &str = "transform_data";

/// Unit ids in registration order
pub const UNIT_IDS: [&str; 4] = [EXTRACT_POSTGRESQL, EXTRACT_API, EXTRACT_PARQUET, TRANSFORM];

/// Build the graph writing through a [`PostgresSink`] on the target store
pub fn build_graph(config: &PipelineConfig) -> PipelineResult<TaskGraph> {
    let sink: Arc<dyn TableSink> = Arc::new(PostgresSink::new(config.target_db.clone()));
    build_graph_with_sink(config, sink)
}

/// Build the graph around an arbitrary sink
pub fn build_graph_with_sink(
    config: &PipelineConfig,
    sink: Arc<dyn TableSink>,
) -> PipelineResult<TaskGraph> {
    let retry = config.schedule.retry_policy();
    let mut graph = TaskGraph::new(config.schedule.max_concurrent_units);

    let relational = RelationalExtractor::new(
        config.source_db.clone(),
        &config.relational.source_table,
        &config.relational.raw_table,
        Arc::clone(&sink),
    )
    .with_mode(config.staging_mode);
    graph.register_unit(EXTRACT_POSTGRESQL, Arc::new(relational), &[], retry)?;

    let api = HttpExtractor::new(&config.api, Arc::clone(&sink))?.with_mode(config.staging_mode);
    graph.register_unit(EXTRACT_API, Arc::new(api), &[], retry)?;

    let parquet = ParquetExtractor::new(&config.parquet.url, &config.parquet.raw_table, Arc::clone(&sink))
        .with_mode(config.staging_mode);
    graph.register_unit(EXTRACT_PARQUET, Arc::new(parquet), &[], retry)?;

    let transformer = Transformer::new(
        config.target_db.clone(),
        StagingTables {
            sales: config.relational.raw_table.clone(),
            employees: config.api.raw_table.clone(),
            categories: config.parquet.raw_table.clone(),
        },
        &config.transformed_table,
        sink,
    );
    graph.register_unit(
        TRANSFORM,
        Arc::new(transformer),
        &[EXTRACT_POSTGRESQL, EXTRACT_API, EXTRACT_PARQUET],
        retry,
    )?;

    graph.set_trigger(&config.schedule.expression, config.schedule.catchup)?;
    Ok(graph)
}
