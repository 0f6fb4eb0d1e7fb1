//! Parquet source: read a whole columnar file into one dataset
//!
//! The file is fetched over HTTP(S) or read from a local path (optionally a
//! `file://` URL), then decoded on the blocking pool.

use arrow::array::{Array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::array::{Date32Array, TimestampMicrosecondArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use async_trait::async_trait;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use sdp_common::dataset::{Column, ColumnType, Value};
use sdp_common::TabularDataset;

use super::log_failure;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::Stage;
use crate::sink::{TableSink, WriteMode};
use crate::stats::UnitStats;

/// Where the file lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileLocation {
    Remote(String),
    Local(PathBuf),
}

impl FileLocation {
    pub fn parse(location: &str) -> Self {
        let location = location.trim();
        if location.starts_with("http://") || location.starts_with("https://") {
            FileLocation::Remote(location.to_string())
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            FileLocation::Local(PathBuf::from(path))
        }
    }
}

/// Dataset type for an Arrow type, `None` when unmapped
pub fn column_type_for(data_type: &DataType) -> Option<ColumnType> {
    match data_type {
        DataType::Utf8 | DataType::LargeUtf8 => Some(ColumnType::Text),
        DataType::Dictionary(_, value) if matches!(**value, DataType::Utf8 | DataType::LargeUtf8) => {
            Some(ColumnType::Text)
        },
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => Some(ColumnType::Integer),
        DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::Decimal128(_, _) => {
            Some(ColumnType::Float)
        },
        DataType::Boolean => Some(ColumnType::Boolean),
        DataType::Date32 | DataType::Date64 => Some(ColumnType::Date),
        DataType::Timestamp(_, _) => Some(ColumnType::Timestamp),
        _ => None,
    }
}

fn downcast<'a, T: 'static>(array: &'a ArrayRef, column: &str) -> PipelineResult<&'a T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        PipelineError::file_read(format!("column '{}' did not cast to the expected array", column))
    })
}

/// Append the cells of `array` to `out` as dataset values
fn append_values(
    out: &mut Vec<Value>,
    array: &ArrayRef,
    column: &str,
    column_type: ColumnType,
) -> PipelineResult<()> {
    match column_type {
        ColumnType::Text => {
            let converted = cast(array, &DataType::Utf8)?;
            let values = downcast::<StringArray>(&converted, column)?;
            out.extend((0..values.len()).map(|i| {
                if values.is_null(i) {
                    Value::Null
                } else {
                    Value::Text(values.value(i).to_string())
                }
            }));
        },
        ColumnType::Integer => {
            let converted = cast(array, &DataType::Int64)?;
            let values = downcast::<Int64Array>(&converted, column)?;
            out.extend(values.iter().map(Value::from));
        },
        ColumnType::Float => {
            let converted = cast(array, &DataType::Float64)?;
            let values = downcast::<Float64Array>(&converted, column)?;
            out.extend(values.iter().map(Value::from));
        },
        ColumnType::Boolean => {
            let values = downcast::<BooleanArray>(array, column)?;
            out.extend(values.iter().map(Value::from));
        },
        ColumnType::Date => {
            let converted = cast(array, &DataType::Date32)?;
            let values = downcast::<Date32Array>(&converted, column)?;
            out.extend((0..values.len()).map(|i| {
                if values.is_null(i) {
                    Value::Null
                } else {
                    values.value_as_date(i).into()
                }
            }));
        },
        ColumnType::Timestamp => {
            // Keep the timezone so only the unit changes; values stay UTC instants
            let tz = match array.data_type() {
                DataType::Timestamp(_, tz) => tz.clone(),
                _ => None,
            };
            let converted = cast(array, &DataType::Timestamp(TimeUnit::Microsecond, tz))?;
            let values = downcast::<TimestampMicrosecondArray>(&converted, column)?;
            out.extend((0..values.len()).map(|i| {
                if values.is_null(i) {
                    Value::Null
                } else {
                    values.value_as_datetime(i).into()
                }
            }));
        },
    }
    Ok(())
}

/// Decode a complete Parquet file held in memory
pub fn decode_parquet(bytes: Bytes) -> PipelineResult<TabularDataset> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)?;
    let schema = Arc::clone(builder.schema());

    let mut layout = Vec::with_capacity(schema.fields().len());
    for field in schema.fields() {
        let column_type = column_type_for(field.data_type()).ok_or_else(|| {
            PipelineError::unsupported_type(field.name(), field.data_type().to_string())
        })?;
        layout.push((field.name().clone(), column_type, Vec::new()));
    }

    for batch in builder.build()? {
        let batch = batch?;
        for ((name, column_type, values), array) in layout.iter_mut().zip(batch.columns()) {
            append_values(values, array, name, *column_type)?;
        }
    }

    let columns = layout
        .into_iter()
        .map(|(name, column_type, values)| Column::new(name, column_type, values))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TabularDataset::from_columns(columns)?)
}

pub struct ParquetExtractor {
    client: reqwest::Client,
    location: FileLocation,
    raw_table: String,
    mode: WriteMode,
    sink: Arc<dyn TableSink>,
}

impl ParquetExtractor {
    pub fn new(location: &str, raw_table: impl Into<String>, sink: Arc<dyn TableSink>) -> Self {
        Self {
            client: reqwest::Client::new(),
            location: FileLocation::parse(location),
            raw_table: raw_table.into(),
            mode: WriteMode::Append,
            sink,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn location(&self) -> &FileLocation {
        &self.location
    }

    async fn read_bytes(&self) -> PipelineResult<Bytes> {
        match &self.location {
            FileLocation::Remote(url) => {
                let response = self.client.get(url).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(PipelineError::file_read(format!(
                        "GET {} returned {}",
                        url, status
                    )));
                }
                Ok(response.bytes().await?)
            },
            FileLocation::Local(path) => tokio::fs::read(path).await.map(Bytes::from).map_err(|e| {
                PipelineError::file_read(format!("failed to read {}: {}", path.display(), e))
            }),
        }
    }

    /// Read and decode the whole file
    pub async fn extract(&self) -> PipelineResult<(TabularDataset, usize)> {
        let result = async {
            let bytes = self.read_bytes().await?;
            let size = bytes.len();
            let dataset = tokio::task::spawn_blocking(move || decode_parquet(bytes)).await??;
            Ok::<_, PipelineError>((dataset, size))
        }
        .await;

        let (dataset, size) = result.inspect_err(|e| log_failure("extract_parquet", e))?;
        info!(
            location = ?self.location,
            bytes = size,
            rows = dataset.num_rows(),
            columns = dataset.num_columns(),
            "Read Parquet file"
        );
        Ok((dataset, size))
    }
}

#[async_trait]
impl Stage for ParquetExtractor {
    async fn run(&self) -> PipelineResult<UnitStats> {
        let mut stats = UnitStats::new();

        let (dataset, size) = self.extract().await?;
        stats.add_bytes(size);
        stats.add_extracted(dataset.num_rows());

        let report = self.sink.write(&self.raw_table, &dataset, self.mode).await?;
        stats.record_load(&report);

        stats.complete();
        Ok(stats)
    }
}
