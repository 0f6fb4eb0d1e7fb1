//! Sales report: join the three staging tables and aggregate
//!
//! Sales rows (relational extract) are joined to employees (HTTP extract) on
//! `employee_id` and to categories (Parquet extract) on `category_id = id`,
//! then summed per `(sale_date, category, employee_name)`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use sdp_common::TabularDataset;

use crate::db::{self, quote_ident, ConnectionDescriptor};
use crate::error::{PipelineError, PipelineResult};
use crate::graph::Stage;
use crate::sink::TableSink;
use crate::stats::UnitStats;

/// Staging tables the report reads from
#[derive(Debug, Clone)]
pub struct StagingTables {
    pub sales: String,
    pub employees: String,
    pub categories: String,
}

/// Aggregation query over the staging tables
pub fn report_sql(tables: &StagingTables) -> String {
    format!(
        "SELECT s.sale_date AS sale_date, \
                c.category AS category, \
                e.employee_name AS employee_name, \
                SUM(s.amount) AS total_sales \
         FROM {sales} AS s \
         INNER JOIN {employees} AS e ON s.employee_id = e.employee_id \
         INNER JOIN {categories} AS c ON s.category_id = c.id \
         GROUP BY s.sale_date, c.category, e.employee_name \
         ORDER BY s.sale_date DESC, e.employee_name ASC, total_sales DESC",
        sales = quote_ident(&tables.sales),
        employees = quote_ident(&tables.employees),
        categories = quote_ident(&tables.categories),
    )
}

pub struct Transformer {
    target: ConnectionDescriptor,
    tables: StagingTables,
    output_table: String,
    sink: Arc<dyn TableSink>,
}

impl Transformer {
    pub fn new(
        target: ConnectionDescriptor,
        tables: StagingTables,
        output_table: impl Into<String>,
        sink: Arc<dyn TableSink>,
    ) -> Self {
        Self {
            target,
            tables,
            output_table: output_table.into(),
            sink,
        }
    }

    /// Run the aggregation against the target store
    pub async fn compute(&self) -> PipelineResult<TabularDataset> {
        let mut conn = self.target.open().await.map_err(|e| {
            error!(target = %self.target.display_name(), error = %e, "Could not connect to target store");
            PipelineError::target_store(e)
        })?;

        let result =
            db::fetch_dataset(&mut conn, &report_sql(&self.tables), PipelineError::target_store).await;
        db::release(conn).await;

        let dataset = result.inspect_err(|e| {
            error!(kind = e.kind(), error = %e, "Transformation failed");
        })?;
        info!(rows = dataset.num_rows(), "Computed sales report");
        Ok(dataset)
    }
}

#[async_trait]
impl Stage for Transformer {
    async fn run(&self) -> PipelineResult<UnitStats> {
        let mut stats = UnitStats::new();

        let dataset = self.compute().await?;
        stats.add_extracted(dataset.num_rows());

        let report = self.sink.load(&self.output_table, &dataset).await?;
        stats.record_load(&report);

        stats.complete();
        Ok(stats)
    }
}
