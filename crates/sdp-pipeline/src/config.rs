//! Pipeline configuration
//!
//! Resolved once from a [`ConfigSource`] and passed explicitly to every
//! constructor. Nothing below the binary reads the environment.

use serde::Serialize;
use std::time::Duration;

use sdp_common::config::ConfigSource;
use sdp_common::SdpError;

use crate::connectors::http::LoadStrategy;
use crate::db::ConnectionDescriptor;
use crate::error::{PipelineError, PipelineResult};
use crate::graph::trigger::Trigger;
use crate::graph::RetryPolicy;
use crate::sink::WriteMode;

// ============================================================================
// Defaults
// ============================================================================

/// Default staging table for the relational extract.
pub const DEFAULT_POSTGRES_RAW_TABLE: &str = "postgresql_raw";

/// Default staging table for the HTTP extract.
pub const DEFAULT_API_RAW_TABLE: &str = "api_raw";

/// Default staging table for the Parquet extract.
pub const DEFAULT_PARQUET_RAW_TABLE: &str = "parquet_raw";

/// Default final reporting table.
pub const DEFAULT_TRANSFORMED_TABLE: &str = "transformed_data";

/// First identifier requested from the HTTP source.
pub const DEFAULT_API_ID_START: i64 = 1;

/// Last identifier requested from the HTTP source (inclusive).
pub const DEFAULT_API_ID_END: i64 = 9;

/// HTTP request timeout in seconds.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default trigger: once a day at midnight UTC.
pub const DEFAULT_SCHEDULE: &str = "@daily";

/// Retries per unit after the first attempt.
pub const DEFAULT_RETRIES: u32 = 1;

/// Delay between attempts in seconds.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 60;

/// Units allowed to run at the same time.
pub const DEFAULT_MAX_CONCURRENT_UNITS: usize = 4;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub source_db: ConnectionDescriptor,
    pub target_db: ConnectionDescriptor,
    pub relational: RelationalSourceConfig,
    pub api: ApiSourceConfig,
    pub parquet: ParquetSourceConfig,
    /// Final reporting table
    pub transformed_table: String,
    /// Write mode for the three raw tables; the final table always appends
    pub staging_mode: WriteMode,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelationalSourceConfig {
    /// Unquoted in the query when it is a plain identifier, so case folds
    pub source_table: String,
    pub raw_table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiSourceConfig {
    pub base_url: String,
    pub raw_table: String,
    pub id_start: i64,
    pub id_end: i64,
    pub load_strategy: LoadStrategy,
    pub timeout_secs: u64,
}

impl ApiSourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParquetSourceConfig {
    /// `http(s)://` URL, `file://` URL or plain path
    pub url: String,
    pub raw_table: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleConfig {
    pub expression: String,
    pub catchup: bool,
    pub retries: u32,
    pub retry_delay_secs: u64,
    pub max_concurrent_units: usize,
}

impl ScheduleConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn trigger(&self) -> PipelineResult<Trigger> {
        Trigger::parse(&self.expression, self.catchup)
    }
}

fn config_err(err: SdpError) -> PipelineError {
    match err {
        SdpError::Config(message) => PipelineError::Config(message),
        other => PipelineError::Config(other.to_string()),
    }
}

impl PipelineConfig {
    /// Resolve and validate the configuration
    pub fn from_source<S: ConfigSource>(source: &S) -> PipelineResult<Self> {
        let config = Self {
            source_db: ConnectionDescriptor::from_source(source, "SOURCE_DB")?,
            target_db: ConnectionDescriptor::from_source(source, "TARGET_DB")?,
            relational: RelationalSourceConfig {
                source_table: source.require("SOURCE_TABLE").map_err(config_err)?,
                raw_table: source.get_or("POSTGRES_RAW_TABLE", DEFAULT_POSTGRES_RAW_TABLE),
            },
            api: ApiSourceConfig {
                base_url: source.require("API_BASE_URL").map_err(config_err)?,
                raw_table: source.get_or("API_RAW_TABLE", DEFAULT_API_RAW_TABLE),
                id_start: source
                    .parse_or("API_ID_START", DEFAULT_API_ID_START)
                    .map_err(config_err)?,
                id_end: source.parse_or("API_ID_END", DEFAULT_API_ID_END).map_err(config_err)?,
                load_strategy: source.get_or("API_LOAD_STRATEGY", "per_identifier").parse()?,
                timeout_secs: source
                    .parse_or("API_TIMEOUT_SECS", DEFAULT_API_TIMEOUT_SECS)
                    .map_err(config_err)?,
            },
            parquet: ParquetSourceConfig {
                url: source.require("PARQUET_URL").map_err(config_err)?,
                raw_table: source.get_or("PARQUET_RAW_TABLE", DEFAULT_PARQUET_RAW_TABLE),
            },
            transformed_table: source.get_or("TRANSFORMED_TABLE", DEFAULT_TRANSFORMED_TABLE),
            staging_mode: source.get_or("STAGING_MODE", "append").parse()?,
            schedule: ScheduleConfig {
                expression: source.get_or("ETL_SCHEDULE", DEFAULT_SCHEDULE),
                catchup: source.flag_or("ETL_CATCHUP", false).map_err(config_err)?,
                retries: source.parse_or("ETL_RETRIES", DEFAULT_RETRIES).map_err(config_err)?,
                retry_delay_secs: source
                    .parse_or("ETL_RETRY_DELAY_SECS", DEFAULT_RETRY_DELAY_SECS)
                    .map_err(config_err)?,
                max_concurrent_units: source
                    .parse_or("ETL_MAX_CONCURRENT_UNITS", DEFAULT_MAX_CONCURRENT_UNITS)
                    .map_err(config_err)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> PipelineResult<()> {
        for (label, db) in [("SOURCE_DB", &self.source_db), ("TARGET_DB", &self.target_db)] {
            if db.port == 0 {
                return Err(PipelineError::config(format!("{}_PORT must be greater than 0", label)));
            }
        }

        if self.api.id_start > self.api.id_end {
            return Err(PipelineError::config(format!(
                "API_ID_START ({}) cannot be greater than API_ID_END ({})",
                self.api.id_start, self.api.id_end
            )));
        }

        if self.schedule.max_concurrent_units == 0 {
            return Err(PipelineError::config(
                "ETL_MAX_CONCURRENT_UNITS must be greater than 0",
            ));
        }

        let tables = [
            &self.relational.raw_table,
            &self.api.raw_table,
            &self.parquet.raw_table,
            &self.transformed_table,
        ];
        for (i, table) in tables.iter().enumerate() {
            if tables[..i].contains(table) {
                return Err(PipelineError::config(format!(
                    "table '{}' is configured for more than one stage",
                    table
                )));
            }
        }

        self.schedule.trigger()?;

        if self.api.timeout_secs == 0 {
            tracing::warn!("API_TIMEOUT_SECS is 0 - HTTP requests will fail immediately");
        }

        Ok(())
    }
}
