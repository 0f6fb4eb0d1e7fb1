//! End-to-end pipeline tests against a real PostgreSQL
//!
//! Source and target share one container; the source table and the staging
//! tables live side by side. Run with `cargo test -- --ignored`.

mod common;

use std::sync::Arc;

use common::{categories_batch, write_parquet, EmployeeDirectory, TestPostgres};
use sdp_common::config::MapSource;
use sdp_common::dataset::{ColumnType, Value};
use sdp_pipeline::config::PipelineConfig;
use sdp_pipeline::connectors::{LoadStrategy, RelationalExtractor};
use sdp_pipeline::db::ConnectionDescriptor;
use sdp_pipeline::graph::{Stage, UnitOutcome};
use sdp_pipeline::sink::{MemorySink, PostgresSink, TableSink};
use sdp_pipeline::transform::{StagingTables, Transformer};
use sdp_pipeline::units::{self, TRANSFORM};
use sdp_pipeline::PipelineError;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer};

const SALES_DDL: &str = "CREATE TABLE vendas (
    sale_date DATE NOT NULL,
    employee_id INTEGER NOT NULL,
    category_id INTEGER NOT NULL,
    amount NUMERIC(10, 2) NOT NULL
)";

fn pipeline_config(db: &ConnectionDescriptor, api_url: &str, parquet: &str) -> PipelineConfig {
    let port = db.port.to_string();
    let mut source = MapSource::new()
        .with("SOURCE_TABLE", "vendas")
        .with("API_BASE_URL", api_url)
        .with("PARQUET_URL", parquet)
        .with("ETL_RETRIES", "0");
    for prefix in ["SOURCE_DB", "TARGET_DB"] {
        source.insert(format!("{}_HOST", prefix), db.host.as_str());
        source.insert(format!("{}_PORT", prefix), port.as_str());
        source.insert(format!("{}_USER", prefix), "postgres");
        source.insert(format!("{}_PASSWORD", prefix), "postgres");
        source.insert(format!("{}_NAME", prefix), "postgres");
    }
    PipelineConfig::from_source(&source).unwrap()
}

async fn employee_api(directory: EmployeeDirectory) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET")).respond_with(directory).mount(&server).await;
    server
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_relational_extract_copies_whole_table() {
    sdp_common::logging::init_test_logging();
    let pg = TestPostgres::start().await.unwrap();
    pg.execute(SALES_DDL).await.unwrap();
    pg.execute(
        "INSERT INTO vendas VALUES
            ('2024-01-01', 1, 7, 10.00),
            ('2024-01-01', 1, 7, 15.00),
            ('2024-01-02', 2, 7, 4.50)",
    )
    .await
    .unwrap();

    let sink: Arc<dyn TableSink> = Arc::new(PostgresSink::new(pg.descriptor()));
    let extractor = RelationalExtractor::new(pg.descriptor(), "vendas", "postgresql_raw", sink);

    let dataset = extractor.extract().await.unwrap();
    assert_eq!(
        dataset.column_names(),
        vec!["sale_date", "employee_id", "category_id", "amount"]
    );
    assert_eq!(dataset.column("amount").unwrap().data_type(), ColumnType::Float);
    assert_eq!(dataset.row(2).unwrap()[3], &Value::Float(4.5));

    let stats = extractor.run().await.unwrap();
    assert_eq!(stats.rows_loaded, 3);
    assert_eq!(pg.count_rows("postgresql_raw").await.unwrap(), 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_staging_appends_across_runs() {
    let pg = TestPostgres::start().await.unwrap();
    pg.execute(SALES_DDL).await.unwrap();
    pg.execute("INSERT INTO vendas VALUES ('2024-01-01', 1, 7, 10.00), ('2024-01-02', 1, 7, 5.00)")
        .await
        .unwrap();

    let sink: Arc<dyn TableSink> = Arc::new(PostgresSink::new(pg.descriptor()));
    let extractor = RelationalExtractor::new(pg.descriptor(), "vendas", "postgresql_raw", sink);

    extractor.run().await.unwrap();
    pg.execute("INSERT INTO vendas VALUES ('2024-01-03', 1, 7, 1.00)").await.unwrap();
    extractor.run().await.unwrap();

    // 2 rows from the first run plus 3 from the second
    assert_eq!(pg.count_rows("postgresql_raw").await.unwrap(), 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_full_graph_produces_sales_report() {
    let pg = TestPostgres::start().await.unwrap();
    pg.execute(SALES_DDL).await.unwrap();
    pg.execute("INSERT INTO vendas VALUES ('2024-01-01', 1, 7, 10.00), ('2024-01-01', 1, 7, 15.00)")
        .await
        .unwrap();

    let api = employee_api(EmployeeDirectory::new().with(1, "Alice")).await;
    let parquet = write_parquet(&categories_batch(&[(7, Some("Snacks"))]));

    let mut config = pipeline_config(
        &pg.descriptor(),
        &api.uri(),
        parquet.path().to_str().unwrap(),
    );
    config.api.id_end = 1;

    let graph = units::build_graph(&config).unwrap();
    let report = graph.run_once().await;
    assert!(report.is_success(), "{:?}", report.units);

    let rows: Vec<(chrono::NaiveDate, String, String, f64)> = sqlx::query_as(
        "SELECT sale_date, category, employee_name, total_sales FROM transformed_data",
    )
    .fetch_all(pg.pool())
    .await
    .unwrap();
    assert_eq!(
        rows,
        vec![(
            chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            "Snacks".to_string(),
            "Alice".to_string(),
            25.0
        )]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_report_groups_and_orders_across_keys() {
    let pg = TestPostgres::start().await.unwrap();
    pg.execute(SALES_DDL).await.unwrap();
    pg.execute(
        "INSERT INTO vendas VALUES
            ('2024-01-01', 1, 7, 10.00),
            ('2024-01-01', 1, 7, 15.00),
            ('2024-01-01', 2, 7, 5.00),
            ('2024-01-01', 2, 8, 40.00),
            ('2024-01-02', 1, 8, 3.00),
            ('2024-01-02', 2, 7, 1.00),
            ('2024-01-02', 2, 7, 1.50)",
    )
    .await
    .unwrap();

    let api = employee_api(EmployeeDirectory::new().with(1, "Alice").with(2, "Bob")).await;
    let parquet = write_parquet(&categories_batch(&[(7, Some("Snacks")), (8, Some("Drinks"))]));

    let mut config = pipeline_config(
        &pg.descriptor(),
        &api.uri(),
        parquet.path().to_str().unwrap(),
    );
    config.api.id_end = 2;
    config.api.load_strategy = LoadStrategy::AfterLoop;

    let report = units::build_graph(&config).unwrap().run_once().await;
    assert!(report.is_success(), "{:?}", report.units);

    let day = |d: u32| chrono::NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
    let expected = vec![
        (day(2), "Drinks".to_string(), "Alice".to_string(), 3.0),
        (day(2), "Snacks".to_string(), "Bob".to_string(), 2.5),
        (day(1), "Snacks".to_string(), "Alice".to_string(), 25.0),
        (day(1), "Drinks".to_string(), "Bob".to_string(), 40.0),
        (day(1), "Snacks".to_string(), "Bob".to_string(), 5.0),
    ];

    // Rows land in the final table in report order
    let rows: Vec<(chrono::NaiveDate, String, String, f64)> = sqlx::query_as(
        "SELECT sale_date, category, employee_name, total_sales \
         FROM transformed_data ORDER BY ctid",
    )
    .fetch_all(pg.pool())
    .await
    .unwrap();
    assert_eq!(rows, expected);

    let transformer = Transformer::new(
        pg.descriptor(),
        StagingTables {
            sales: "postgresql_raw".to_string(),
            employees: "api_raw".to_string(),
            categories: "parquet_raw".to_string(),
        },
        "transformed_data",
        Arc::new(MemorySink::new()),
    );
    let dataset = transformer.compute().await.unwrap();
    assert_eq!(dataset.num_rows(), expected.len());
    let totals: Vec<f64> = dataset
        .column("total_sales")
        .unwrap()
        .values()
        .iter()
        .filter_map(Value::as_f64)
        .collect();
    assert_eq!(totals, vec![3.0, 2.5, 25.0, 40.0, 5.0]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_per_identifier_loading_inflates_totals() {
    let pg = TestPostgres::start().await.unwrap();
    pg.execute(SALES_DDL).await.unwrap();
    pg.execute("INSERT INTO vendas VALUES ('2024-01-01', 1, 7, 10.00), ('2024-01-01', 1, 7, 15.00)")
        .await
        .unwrap();

    let api = employee_api(EmployeeDirectory::new().with(1, "Alice")).await;
    let parquet = write_parquet(&categories_batch(&[(7, Some("Snacks"))]));

    let mut config = pipeline_config(
        &pg.descriptor(),
        &api.uri(),
        parquet.path().to_str().unwrap(),
    );
    config.api.id_end = 3;

    let report = units::build_graph(&config).unwrap().run_once().await;
    assert!(report.is_success(), "{:?}", report.units);

    // Alice is staged once per cumulative snapshot, so three times
    assert_eq!(pg.count_rows("api_raw").await.unwrap(), 3);
    let total: f64 = sqlx::query_scalar("SELECT total_sales FROM transformed_data")
        .fetch_one(pg.pool())
        .await
        .unwrap();
    assert_eq!(total, 75.0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_failed_extract_leaves_no_rows_and_skips_transform() {
    let pg = TestPostgres::start().await.unwrap();
    pg.execute(SALES_DDL).await.unwrap();
    pg.execute("INSERT INTO vendas VALUES ('2024-01-01', 1, 7, 10.00)").await.unwrap();

    let api = employee_api(EmployeeDirectory::new().with(1, "Alice")).await;
    let mut config = pipeline_config(&pg.descriptor(), &api.uri(), "/nonexistent/categories.parquet");
    config.source_db.port = 1;

    let report = units::build_graph(&config).unwrap().run_once().await;

    assert!(matches!(
        report.outcome(units::EXTRACT_POSTGRESQL),
        Some(UnitOutcome::Failed { kind, .. }) if kind == "source_store"
    ));
    assert!(matches!(report.outcome(TRANSFORM), Some(UnitOutcome::Skipped { .. })));
    assert!(!pg.table_exists("postgresql_raw").await.unwrap());
    assert!(!pg.table_exists("transformed_data").await.unwrap());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_non_tabular_payload_is_not_loaded() {
    let pg = TestPostgres::start().await.unwrap();
    let sink = PostgresSink::new(pg.descriptor());

    let report = sink.load_payload("payload_raw", &json!("just a string")).await.unwrap();
    assert_eq!(report.rows_written, 0);
    assert!(!pg.table_exists("payload_raw").await.unwrap());

    let report = sink
        .load_payload("payload_raw", &json!([{"id": 1, "name": "Snacks"}]))
        .await
        .unwrap();
    assert_eq!(report.rows_written, 1);
    assert_eq!(pg.count_rows("payload_raw").await.unwrap(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unreachable_target_is_target_store_error() {
    let pg = TestPostgres::start().await.unwrap();
    let mut target = pg.descriptor();
    target.port = 1;

    let err = PostgresSink::new(target)
        .load_payload("payload_raw", &json!([{"id": 1}]))
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TargetStore(_)));
}
