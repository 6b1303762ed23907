//! Query execution against heterogeneous engines.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          QueryExecutor                           │
//! │   timeout · retry with backoff · cancellation · normalization    │
//! └──────────────────────────────────────────────────────────────────┘
//!                                 │ route(config)
//!                                 ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │               AdapterRegistry (EngineKind → Adapter)             │
//! └──────────────────────────────────────────────────────────────────┘
//!        │                      │                       │
//!        ▼                      ▼                       ▼
//! ┌──────────────┐   ┌──────────────────────┐   ┌──────────────────┐
//! │  Row stores  │   │  Analytical (REST)   │   │     Embedded     │
//! │ postgres     │   │ bigquery             │   │ sqlite           │
//! │ mysql        │   │ snowflake            │   │ duckdb (worker)  │
//! │ sqlserver    │   │                      │   │                  │
//! │   (worker)   │   │                      │   │                  │
//! └──────────────┘   └──────────────────────┘   └──────────────────┘
//!                                 │
//!                                 ▼
//!                  RawEngineResult ──► tabular::normalize
//! ```
//!
//! Each adapter opens a fresh connection per call and releases it on every
//! exit path. Nothing is pooled or cached.

pub mod bigquery;
mod error;
mod executor;
mod http;
pub mod mysql;
pub mod postgres;
mod raw;
mod router;
pub mod snowflake;
pub mod sqlite;
mod temporal;
pub mod worker;

pub use error::{EngineError, EngineResult};
pub use executor::{ExecutionPolicy, QueryExecutor, QueryOutcome, RetryPolicy};
pub use raw::{FieldDescriptor, NativeValue, RawEngineResult, TypeOrigin};
pub use router::AdapterRegistry;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::SystemConfig;

/// The closed set of supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EngineKind {
    Postgres,
    MySql,
    SqlServer,
    BigQuery,
    Snowflake,
    Sqlite,
    DuckDb,
}

impl EngineKind {
    pub const ALL: [EngineKind; 7] = [
        EngineKind::Postgres,
        EngineKind::MySql,
        EngineKind::SqlServer,
        EngineKind::BigQuery,
        EngineKind::Snowflake,
        EngineKind::Sqlite,
        EngineKind::DuckDb,
    ];

    /// Resolve an engine tag, ignoring case and surrounding whitespace.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let kind = match tag.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => EngineKind::Postgres,
            "mysql" => EngineKind::MySql,
            "sqlserver" | "mssql" | "sql_server" => EngineKind::SqlServer,
            "bigquery" | "bq" => EngineKind::BigQuery,
            "snowflake" => EngineKind::Snowflake,
            "sqlite" | "sqlite3" => EngineKind::Sqlite,
            "duckdb" | "duck" => EngineKind::DuckDb,
            _ => return None,
        };
        Some(kind)
    }

    /// Canonical lowercase tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::MySql => "mysql",
            EngineKind::SqlServer => "sqlserver",
            EngineKind::BigQuery => "bigquery",
            EngineKind::Snowflake => "snowflake",
            EngineKind::Sqlite => "sqlite",
            EngineKind::DuckDb => "duckdb",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_tag(s).ok_or_else(|| EngineError::UnsupportedEngine(s.to_string()))
    }
}

/// Executes one query against one engine family.
///
/// Implementations open a fresh connection per call and release it on every
/// exit path, including when the returned future is dropped.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Engine this adapter serves.
    fn kind(&self) -> EngineKind;

    /// Run `query` and return engine-native rows with resolved field types.
    ///
    /// # Errors
    ///
    /// * [`EngineError::IncompleteConfig`] - a required parameter is missing
    /// * [`EngineError::Connection`] - the engine is unreachable or refused
    ///   the credentials
    /// * [`EngineError::Query`] - the engine rejected the query, or the
    ///   query was empty
    /// * [`EngineError::Cancelled`] - `cancel` fired
    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult>;
}

/// Fetch a required string parameter.
pub(crate) fn require<'a>(
    config: &'a SystemConfig,
    parameter: &'static str,
) -> EngineResult<&'a str> {
    config
        .param(parameter)
        .ok_or_else(|| EngineError::IncompleteConfig {
            system: config.name.clone(),
            engine: config.engine.clone(),
            parameter,
        })
}

/// Reject empty query text before contacting the engine.
pub(crate) fn ensure_query<'q>(config: &SystemConfig, query: &'q str) -> EngineResult<&'q str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(EngineError::query(&config.name, "query text is empty"));
    }
    Ok(trimmed)
}
