//! Store connections
//!
//! A [`ConnectionDescriptor`] names one PostgreSQL store. Every unit opens
//! its own exclusively owned connection from it and hands the connection
//! back to [`release`] on every exit path; connections are never pooled or
//! shared between units.

use serde::Serialize;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Connection;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, warn};

use sdp_common::config::ConfigSource;

use crate::error::{PipelineError, PipelineResult};

pub mod read;
pub mod write;

pub use read::fetch_dataset;
pub use write::{create_table_sql, write_dataset, MAX_BIND_PARAMS};

/// Default PostgreSQL port
pub const DEFAULT_DB_PORT: u16 = 5432;

/// SQL dialect of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Postgres,
}

impl FromStr for Dialect {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            other => Err(PipelineError::config(format!("unsupported dialect '{}'", other))),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Postgres => write!(f, "postgres"),
        }
    }
}

/// Everything needed to open a connection to one store
#[derive(Clone, Serialize)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    secret: String,
    pub database: String,
    pub dialect: Dialect,
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .field("database", &self.database)
            .field("dialect", &self.dialect)
            .finish()
    }
}

impl ConnectionDescriptor {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        secret: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            secret: secret.into(),
            database: database.into(),
            dialect: Dialect::Postgres,
        }
    }

    /// Resolve `<PREFIX>_HOST`, `_PORT`, `_USER`, `_PASSWORD`, `_NAME` and
    /// `_DIALECT` from `source`.
    ///
    /// Host, user and database name are required; the password may be blank
    /// for trust authentication.
    pub fn from_source<S: ConfigSource>(source: &S, prefix: &str) -> PipelineResult<Self> {
        let key = |suffix: &str| format!("{}_{}", prefix, suffix);
        let config_err = |e: sdp_common::SdpError| PipelineError::config(e.to_string());

        let dialect = source.get_or(&key("DIALECT"), "postgres").parse::<Dialect>()?;

        Ok(Self {
            host: source.require(&key("HOST")).map_err(config_err)?,
            port: source.parse_or(&key("PORT"), DEFAULT_DB_PORT).map_err(config_err)?,
            user: source.require(&key("USER")).map_err(config_err)?,
            secret: source.get(&key("PASSWORD")).unwrap_or_default(),
            database: source.require(&key("NAME")).map_err(config_err)?,
            dialect,
        })
    }

    pub fn connect_options(&self) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .database(&self.database);

        if self.secret.is_empty() {
            options
        } else {
            options.password(&self.secret)
        }
    }

    /// Open a new exclusively owned connection
    pub async fn open(&self) -> Result<PgConnection, sqlx::Error> {
        let started = Instant::now();
        let conn = PgConnection::connect_with(&self.connect_options()).await?;
        debug!(
            host = %self.host,
            port = self.port,
            database = %self.database,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Connection opened"
        );
        Ok(conn)
    }

    /// `host:port/database`, safe to log
    pub fn display_name(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

/// Close a connection, logging (not raising) a failed close
pub async fn release(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close connection cleanly");
    }
}

/// Quote a possibly schema-qualified identifier (`schema.table`)
pub fn quote_ident(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Reference an existing, possibly schema-qualified table.
///
/// Plain identifiers stay unquoted so PostgreSQL folds them to lower case
/// (`Vendas` finds `vendas`); anything else is quoted verbatim.
pub fn table_ref(name: &str) -> String {
    name.split('.')
        .map(|part| {
            let plain = part
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && part
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
            if plain {
                part.to_string()
            } else {
                quote_ident(part)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sdp_common::config::MapSource;

    fn source() -> MapSource {
        MapSource::new()
            .with("SOURCE_DB_HOST", "db.internal")
            .with("SOURCE_DB_USER", "etl")
            .with("SOURCE_DB_PASSWORD", "hunter2")
            .with("SOURCE_DB_NAME", "sales")
    }

    #[test]
    fn test_from_source_defaults() {
        let descriptor = ConnectionDescriptor::from_source(&source(), "SOURCE_DB").unwrap();
        assert_eq!(descriptor.host, "db.internal");
        assert_eq!(descriptor.port, DEFAULT_DB_PORT);
        assert_eq!(descriptor.dialect, Dialect::Postgres);
        assert_eq!(descriptor.display_name(), "db.internal:5432/sales");
    }

    #[test]
    fn test_from_source_missing_host() {
        let mut source = source();
        source.remove("SOURCE_DB_HOST");
        let err = ConnectionDescriptor::from_source(&source, "SOURCE_DB").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(err.to_string().contains("SOURCE_DB_HOST"));
    }

    #[test]
    fn test_unsupported_dialect() {
        let source = source().with("SOURCE_DB_DIALECT", "mysql");
        let err = ConnectionDescriptor::from_source(&source, "SOURCE_DB").unwrap_err();
        assert!(err.to_string().contains("mysql"));
    }

    #[test]
    fn test_secret_is_redacted() {
        let descriptor = ConnectionDescriptor::from_source(&source(), "SOURCE_DB").unwrap();
        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));

        let json = serde_json::to_string(&descriptor).unwrap();
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("sales"), "\"sales\"");
        assert_eq!(quote_ident("staging.api_raw"), "\"staging\".\"api_raw\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_table_ref_folds_plain_names() {
        assert_eq!(table_ref("Vendas"), "Vendas");
        assert_eq!(table_ref("public.vendas"), "public.vendas");
        assert_eq!(table_ref("sales data"), "\"sales data\"");
        assert_eq!(table_ref("staging.2024_sales"), "staging.\"2024_sales\"");
    }
}
