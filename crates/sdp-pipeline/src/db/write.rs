//! Write datasets into tables
//!
//! The table is created from the dataset's inferred schema when missing, and
//! rows go in as multi-row `INSERT`s chunked below the PostgreSQL bind
//! parameter limit. Everything runs in one transaction, so a failed write
//! leaves the table as it was.

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::postgres::PgConnection;
use sqlx::query_builder::Separated;
use sqlx::{Connection, Postgres, QueryBuilder};
use tracing::debug;

use sdp_common::dataset::{ColumnType, Value};
use sdp_common::TabularDataset;

use super::quote_ident;
use crate::sink::WriteMode;

/// PostgreSQL limit on bind parameters per statement
pub const MAX_BIND_PARAMS: usize = 65_535;

fn ddl_type(data_type: ColumnType) -> &'static str {
    match data_type {
        ColumnType::Text => "TEXT",
        ColumnType::Integer => "BIGINT",
        ColumnType::Float => "DOUBLE PRECISION",
        ColumnType::Boolean => "BOOLEAN",
        ColumnType::Date => "DATE",
        ColumnType::Timestamp => "TIMESTAMP",
    }
}

/// `CREATE TABLE IF NOT EXISTS` statement for the dataset's columns
pub fn create_table_sql(table: &str, dataset: &TabularDataset) -> String {
    let columns = dataset
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(c.name()), ddl_type(c.data_type())))
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS {} ({})", quote_ident(table), columns)
}

/// Rows per `INSERT` for a dataset with `num_columns` columns
pub fn rows_per_statement(num_columns: usize) -> usize {
    (MAX_BIND_PARAMS / num_columns.max(1)).max(1)
}

/// Write every row of `dataset` into `table`, returning the rows inserted
pub async fn write_dataset(
    conn: &mut PgConnection,
    table: &str,
    dataset: &TabularDataset,
    mode: WriteMode,
) -> Result<u64, sqlx::Error> {
    let quoted_table = quote_ident(table);
    let column_list = dataset
        .columns()
        .iter()
        .map(|c| quote_ident(c.name()))
        .collect::<Vec<_>>()
        .join(", ");

    let mut tx = conn.begin().await?;

    sqlx::query(&create_table_sql(table, dataset))
        .execute(&mut *tx)
        .await?;

    if mode == WriteMode::Replace {
        let deleted = sqlx::query(&format!("DELETE FROM {}", quoted_table))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        debug!(table, deleted, "Cleared table before replace");
    }

    let total_rows = dataset.num_rows();
    let chunk_size = rows_per_statement(dataset.num_columns());
    let mut inserted = 0u64;
    let mut start = 0;

    while start < total_rows {
        let end = (start + chunk_size).min(total_rows);

        let mut query_builder: QueryBuilder<'_, Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} ({}) ", quoted_table, column_list));

        query_builder.push_values(start..end, |mut b, row| {
            for column in dataset.columns() {
                push_cell(&mut b, &column.values()[row], column.data_type());
            }
        });

        inserted += query_builder.build().execute(&mut *tx).await?.rows_affected();
        start = end;
    }

    tx.commit().await?;
    Ok(inserted)
}

fn push_cell<'args>(
    b: &mut Separated<'_, 'args, Postgres, &'static str>,
    value: &'args Value,
    data_type: ColumnType,
) {
    match value {
        Value::Text(v) => b.push_bind(v.as_str()),
        Value::Integer(v) => b.push_bind(*v),
        Value::Float(v) => b.push_bind(*v),
        Value::Boolean(v) => b.push_bind(*v),
        Value::Date(v) => b.push_bind(*v),
        Value::Timestamp(v) => b.push_bind(*v),
        // Nulls are bound with the column's type so PostgreSQL can infer it
        Value::Null => match data_type {
            ColumnType::Text => b.push_bind(None::<String>),
            ColumnType::Integer => b.push_bind(None::<i64>),
            ColumnType::Float => b.push_bind(None::<f64>),
            ColumnType::Boolean => b.push_bind(None::<bool>),
            ColumnType::Date => b.push_bind(None::<NaiveDate>),
            ColumnType::Timestamp => b.push_bind(None::<NaiveDateTime>),
        },
    };
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sdp_common::dataset::DatasetBuilder;

    #[test]
    fn test_create_table_sql() {
        let dataset = DatasetBuilder::new()
            .column("sale_date", ColumnType::Date)
            .column("category", ColumnType::Text)
            .column("total_sales", ColumnType::Float)
            .column("employee_id", ColumnType::Integer)
            .build()
            .unwrap();

        assert_eq!(
            create_table_sql("transformed_data", &dataset),
            "CREATE TABLE IF NOT EXISTS \"transformed_data\" (\"sale_date\" DATE, \
             \"category\" TEXT, \"total_sales\" DOUBLE PRECISION, \"employee_id\" BIGINT)"
        );
    }

    #[test]
    fn test_rows_per_statement_stays_under_bind_limit() {
        assert_eq!(rows_per_statement(1), MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(2), 32_767);
        assert!(rows_per_statement(7) * 7 <= MAX_BIND_PARAMS);
        assert_eq!(rows_per_statement(100_000), 1);
        assert_eq!(rows_per_statement(0), MAX_BIND_PARAMS);
    }
}
