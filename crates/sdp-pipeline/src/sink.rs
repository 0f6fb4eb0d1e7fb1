//! Dataset sinks
//!
//! [`TableSink`] is the one way stages persist data. [`PostgresSink`] writes
//! into the target store; [`MemorySink`] keeps writes in memory for tests and
//! dry runs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{error, info, warn};

use sdp_common::TabularDataset;

use crate::db::{self, ConnectionDescriptor};
use crate::error::{PipelineError, PipelineResult};

/// How a write treats rows already in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Keep existing rows
    #[default]
    Append,
    /// Delete existing rows in the same transaction
    Replace,
}

impl FromStr for WriteMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "append" => Ok(WriteMode::Append),
            "replace" => Ok(WriteMode::Replace),
            other => Err(PipelineError::config(format!("invalid write mode '{}'", other))),
        }
    }
}

impl std::fmt::Display for WriteMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteMode::Append => write!(f, "append"),
            WriteMode::Replace => write!(f, "replace"),
        }
    }
}

/// Outcome of one sink call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub table: String,
    pub rows_written: u64,
    /// Nothing was written (non-tabular payload or zero-column dataset)
    pub skipped: bool,
}

impl LoadReport {
    pub fn written(table: &str, rows_written: u64) -> Self {
        Self {
            table: table.to_string(),
            rows_written,
            skipped: false,
        }
    }

    pub fn skipped(table: &str) -> Self {
        Self {
            table: table.to_string(),
            rows_written: 0,
            skipped: true,
        }
    }
}

#[async_trait]
pub trait TableSink: Send + Sync {
    /// Write `dataset` into `table`, creating the table when missing
    async fn write(
        &self,
        table: &str,
        dataset: &TabularDataset,
        mode: WriteMode,
    ) -> PipelineResult<LoadReport>;

    /// Append `dataset` to `table`
    async fn load(&self, table: &str, dataset: &TabularDataset) -> PipelineResult<LoadReport> {
        self.write(table, dataset, WriteMode::Append).await
    }

    /// Append a JSON payload to `table`.
    ///
    /// A payload that is not tabular is logged and dropped without touching
    /// the store; this is not an error.
    async fn load_payload(
        &self,
        table: &str,
        payload: &serde_json::Value,
    ) -> PipelineResult<LoadReport> {
        match TabularDataset::from_json(payload) {
            Ok(dataset) => self.load(table, &dataset).await,
            Err(e) => {
                error!(table, error = %e, "Payload is not a table, nothing loaded");
                Ok(LoadReport::skipped(table))
            },
        }
    }
}

/// Sink writing into the target PostgreSQL store
#[derive(Debug, Clone)]
pub struct PostgresSink {
    target: ConnectionDescriptor,
}

impl PostgresSink {
    pub fn new(target: ConnectionDescriptor) -> Self {
        Self { target }
    }

    pub fn target(&self) -> &ConnectionDescriptor {
        &self.target
    }
}

#[async_trait]
impl TableSink for PostgresSink {
    async fn write(
        &self,
        table: &str,
        dataset: &TabularDataset,
        mode: WriteMode,
    ) -> PipelineResult<LoadReport> {
        if dataset.num_columns() == 0 {
            warn!(table, "Dataset has no columns, skipping load");
            return Ok(LoadReport::skipped(table));
        }

        let started = Instant::now();
        let mut conn = self.target.open().await.map_err(|e| {
            error!(table, target = %self.target.display_name(), error = %e, "Could not connect to target store");
            PipelineError::target_store(e)
        })?;

        let result = db::write_dataset(&mut conn, table, dataset, mode).await;
        db::release(conn).await;

        match result {
            Ok(rows) => {
                info!(
                    table,
                    rows,
                    %mode,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Loaded dataset into table"
                );
                Ok(LoadReport::written(table, rows))
            },
            Err(e) => {
                error!(table, error = %e, "Load into target store failed");
                Err(PipelineError::target_store(e))
            },
        }
    }
}

/// A write captured by [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedWrite {
    pub table: String,
    pub dataset: TabularDataset,
    pub mode: WriteMode,
}

/// In-memory sink that records every write
#[derive(Debug, Default)]
pub struct MemorySink {
    writes: Mutex<Vec<RecordedWrite>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write so far, in call order
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }

    /// Writes addressed to `table`
    pub fn writes_to(&self, table: &str) -> Vec<RecordedWrite> {
        self.writes().into_iter().filter(|w| w.table == table).collect()
    }

    /// Rows a real store would hold in `table` after these writes
    pub fn row_count(&self, table: &str) -> usize {
        self.writes_to(table).iter().fold(0, |rows, w| match w.mode {
            WriteMode::Append => rows + w.dataset.num_rows(),
            WriteMode::Replace => w.dataset.num_rows(),
        })
    }
}

#[async_trait]
impl TableSink for MemorySink {
    async fn write(
        &self,
        table: &str,
        dataset: &TabularDataset,
        mode: WriteMode,
    ) -> PipelineResult<LoadReport> {
        if dataset.num_columns() == 0 {
            warn!(table, "Dataset has no columns, skipping load");
            return Ok(LoadReport::skipped(table));
        }

        let mut writes = self
            .writes
            .lock()
            .map_err(|_| PipelineError::unexpected("memory sink lock poisoned"))?;
        writes.push(RecordedWrite {
            table: table.to_string(),
            dataset: dataset.clone(),
            mode,
        });
        Ok(LoadReport::written(table, dataset.num_rows() as u64))
    }
}
