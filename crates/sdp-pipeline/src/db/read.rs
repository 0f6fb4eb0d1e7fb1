//! Materialise query results as datasets

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::types::BigDecimal;
use sqlx::{Column, Executor, Row, Statement, TypeInfo};

use sdp_common::dataset::{ColumnType, DatasetBuilder, Value};
use sdp_common::TabularDataset;

use crate::error::{PipelineError, PipelineResult};

/// Dataset type for a PostgreSQL type name, `None` when unmapped
pub fn column_type_for(pg_type: &str) -> Option<ColumnType> {
    match pg_type {
        "BOOL" => Some(ColumnType::Boolean),
        "INT2" | "INT4" | "INT8" => Some(ColumnType::Integer),
        "FLOAT4" | "FLOAT8" | "NUMERIC" => Some(ColumnType::Float),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CHAR" => Some(ColumnType::Text),
        "DATE" => Some(ColumnType::Date),
        "TIMESTAMP" | "TIMESTAMPTZ" => Some(ColumnType::Timestamp),
        _ => None,
    }
}

/// Run `sql` and collect every row into a dataset.
///
/// Column names and types come from the prepared statement, so an empty
/// result still carries its schema. Store failures are classified by
/// `store_error` (source or target side); unmapped column types are
/// [`PipelineError::UnsupportedType`].
pub async fn fetch_dataset(
    conn: &mut PgConnection,
    sql: &str,
    store_error: fn(sqlx::Error) -> PipelineError,
) -> PipelineResult<TabularDataset> {
    let statement = (&mut *conn).prepare(sql).await.map_err(store_error)?;

    let mut schema = Vec::with_capacity(statement.columns().len());
    let mut builder = DatasetBuilder::new();
    for column in statement.columns() {
        let type_name = column.type_info().name().to_string();
        let column_type = column_type_for(&type_name)
            .ok_or_else(|| PipelineError::unsupported_type(column.name(), type_name.clone()))?;
        builder = builder.column(column.name(), column_type);
        schema.push((type_name, column_type));
    }

    let rows = sqlx::query(sql).fetch_all(&mut *conn).await.map_err(store_error)?;

    for row in &rows {
        let mut values = Vec::with_capacity(schema.len());
        for (index, (type_name, _)) in schema.iter().enumerate() {
            values.push(decode_cell(row, index, type_name).map_err(store_error)?);
        }
        builder.push_row(values)?;
    }

    Ok(builder.build()?)
}

fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    let value = match type_name {
        "BOOL" => row.try_get::<Option<bool>, _>(index)?.into(),
        "INT2" => row.try_get::<Option<i16>, _>(index)?.map(i64::from).into(),
        "INT4" => row.try_get::<Option<i32>, _>(index)?.map(i64::from).into(),
        "INT8" => row.try_get::<Option<i64>, _>(index)?.into(),
        "FLOAT4" => row.try_get::<Option<f32>, _>(index)?.map(f64::from).into(),
        "FLOAT8" => row.try_get::<Option<f64>, _>(index)?.into(),
        "NUMERIC" => match row.try_get::<Option<BigDecimal>, _>(index)? {
            Some(decimal) => Value::Float(decimal.to_string().parse::<f64>().map_err(|e| {
                sqlx::Error::ColumnDecode {
                    index: index.to_string(),
                    source: Box::new(e),
                }
            })?),
            None => Value::Null,
        },
        "DATE" => row.try_get::<Option<NaiveDate>, _>(index)?.into(),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(index)?.into(),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(index)?
            .map(|ts| ts.naive_utc())
            .into(),
        _ => row.try_get::<Option<String>, _>(index)?.into(),
    };
    Ok(value)
}
