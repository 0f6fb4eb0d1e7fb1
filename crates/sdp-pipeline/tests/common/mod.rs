//! Shared helpers for SDP pipeline integration tests
//!
//! - [`TestPostgres`]: a throwaway PostgreSQL container (requires Docker)
//! - Parquet fixtures written with the Arrow writer
//! - A wiremock responder that answers `?id=<n>` with an employee name

#![allow(dead_code)]

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Date32Array, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;
use tracing::info;
use wiremock::{Request, Respond, ResponseTemplate};

use sdp_pipeline::db::ConnectionDescriptor;

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container plus a pool for assertions
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
    descriptor: ConnectionDescriptor,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?
            .to_string();
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let descriptor = ConnectionDescriptor::new(host, port, "postgres", "postgres", "postgres");

        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(descriptor.connect_options())
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
            descriptor,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn descriptor(&self) -> ConnectionDescriptor {
        self.descriptor.clone()
    }

    pub async fn execute(&self, sql: &str) -> Result<()> {
        sqlx::raw_sql(sql)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to execute: {}", sql))?;
        Ok(())
    }

    pub async fn count_rows(&self, table: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count rows in {}", table))?;
        Ok(count)
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
        )
        .bind(table)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

// ============================================================================
// Parquet fixtures
// ============================================================================

/// `(id BIGINT, category TEXT)` category rows
pub fn categories_batch(rows: &[(i64, Option<&str>)]) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("category", DataType::Utf8, true),
    ]));
    let ids: ArrayRef = Arc::new(Int64Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>()));
    let names: ArrayRef = Arc::new(StringArray::from(rows.iter().map(|r| r.1).collect::<Vec<_>>()));

    RecordBatch::try_new(schema, vec![ids, names]).expect("valid categories batch")
}

/// A batch mixing float, date and nullable columns
pub fn mixed_batch() -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("weight", DataType::Float64, true),
        Field::new("launched", DataType::Date32, true),
    ]));
    let columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from(vec![1, 2, 3])),
        Arc::new(Float64Array::from(vec![Some(1.5), None, Some(0.25)])),
        // 19723 days after the epoch is 2024-01-01
        Arc::new(Date32Array::from(vec![Some(19_723), Some(19_724), None])),
    ];

    RecordBatch::try_new(schema, columns).expect("valid mixed batch")
}

/// Encode `batch` as an in-memory Parquet file
pub fn parquet_bytes(batch: &RecordBatch) -> Vec<u8> {
    let mut buffer = Vec::new();
    let mut writer =
        ArrowWriter::try_new(&mut buffer, batch.schema(), None).expect("create parquet writer");
    writer.write(batch).expect("write batch");
    writer.close().expect("close parquet writer");
    buffer
}

/// Write `batch` to a temporary `.parquet` file
pub fn write_parquet(batch: &RecordBatch) -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".parquet")
        .tempfile()
        .expect("create temp file");
    std::fs::write(file.path(), parquet_bytes(batch)).expect("write parquet file");
    file
}

// ============================================================================
// HTTP employee source
// ============================================================================

/// Answers `GET ?id=<n>` with the configured name, or 404 for unknown ids
#[derive(Clone, Default)]
pub struct EmployeeDirectory {
    names: HashMap<String, String>,
}

impl EmployeeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: i64, name: &str) -> Self {
        self.names.insert(id.to_string(), name.to_string());
        self
    }

    /// Ids `range` named `Employee <id>`
    pub fn numbered(range: std::ops::RangeInclusive<i64>) -> Self {
        range.fold(Self::new(), |dir, id| dir.with(id, &format!("Employee {}", id)))
    }
}

impl Respond for EmployeeDirectory {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "id")
            .map(|(_, value)| value.into_owned());

        match id.and_then(|id| self.names.get(&id)) {
            Some(name) => ResponseTemplate::new(200).set_body_string(name.clone()),
            None => ResponseTemplate::new(404),
        }
    }
}

/// Ids requested from a mock server, in arrival order
pub fn requested_ids(requests: &[Request]) -> Vec<i64> {
    requests
        .iter()
        .filter_map(|r| {
            r.url
                .query_pairs()
                .find(|(key, _)| key == "id")
                .and_then(|(_, value)| value.parse().ok())
        })
        .collect()
}
