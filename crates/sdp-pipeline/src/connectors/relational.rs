//! Relational source: copy a whole table from the source store

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use sdp_common::TabularDataset;

use super::log_failure;
use crate::db::{self, table_ref, ConnectionDescriptor};
use crate::error::{PipelineError, PipelineResult};
use crate::graph::Stage;
use crate::sink::{TableSink, WriteMode};
use crate::stats::UnitStats;

pub struct RelationalExtractor {
    source: ConnectionDescriptor,
    source_table: String,
    raw_table: String,
    mode: WriteMode,
    sink: Arc<dyn TableSink>,
}

impl RelationalExtractor {
    pub fn new(
        source: ConnectionDescriptor,
        source_table: impl Into<String>,
        raw_table: impl Into<String>,
        sink: Arc<dyn TableSink>,
    ) -> Self {
        Self {
            source,
            source_table: source_table.into(),
            raw_table: raw_table.into(),
            mode: WriteMode::Append,
            sink,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn query(&self) -> String {
        format!("SELECT * FROM {}", table_ref(&self.source_table))
    }

    /// Read the full source table. The connection is closed before returning.
    pub async fn extract(&self) -> PipelineResult<TabularDataset> {
        let mut conn = self.source.open().await.map_err(|e| {
            let err = PipelineError::source_store(e);
            log_failure("extract_postgresql", &err);
            err
        })?;

        let result = db::fetch_dataset(&mut conn, &self.query(), PipelineError::source_store).await;
        db::release(conn).await;

        let dataset = result.inspect_err(|e| log_failure("extract_postgresql", e))?;
        info!(
            table = %self.source_table,
            rows = dataset.num_rows(),
            columns = dataset.num_columns(),
            "Extracted source table"
        );
        Ok(dataset)
    }
}

#[async_trait]
impl Stage for RelationalExtractor {
    async fn run(&self) -> PipelineResult<UnitStats> {
        let mut stats = UnitStats::new();

        let dataset = self.extract().await?;
        stats.add_extracted(dataset.num_rows());

        let report = self.sink.write(&self.raw_table, &dataset, self.mode).await?;
        stats.record_load(&report);

        stats.complete();
        Ok(stats)
    }
}
