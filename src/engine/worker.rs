//! SQL Server and DuckDB through the database worker process.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::temporal::rfc3339_to_date;
use super::{ensure_query, require, Adapter, EngineError, EngineKind, EngineResult};
use super::{FieldDescriptor, NativeValue, RawEngineResult};
use crate::config::{parse_duration, Settings, SystemConfig};
use crate::tabular::ColumnType;
use crate::worker::{WorkerClient, WorkerError};

/// Where to find the worker binary and how long a request may take.
#[derive(Debug, Clone)]
pub struct WorkerLauncher {
    path: Option<PathBuf>,
    timeout: Duration,
}

impl WorkerLauncher {
    pub fn new(path: Option<PathBuf>, timeout: Duration) -> Self {
        Self { path, timeout }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let timeout = parse_duration(&settings.execution.query_timeout)
            .unwrap_or(Duration::from_secs(60));
        Self::new(settings.worker_path(), timeout)
    }

    async fn spawn(&self) -> Result<WorkerClient, WorkerError> {
        let path = self.path.as_ref().ok_or(WorkerError::NotFound)?;
        WorkerClient::spawn_with_timeout(path, self.timeout).await
    }
}

/// Adapter for an engine the worker serves.
#[derive(Debug, Clone)]
pub struct WorkerAdapter {
    kind: EngineKind,
    launcher: WorkerLauncher,
}

impl WorkerAdapter {
    /// Engines the worker does not serve fail at execution with
    /// [`EngineError::UnsupportedEngine`].
    pub fn new(kind: EngineKind, launcher: WorkerLauncher) -> Self {
        Self { kind, launcher }
    }

    fn driver(&self) -> EngineResult<&'static str> {
        match self.kind {
            EngineKind::SqlServer => Ok("mssql"),
            EngineKind::DuckDb => Ok("duckdb"),
            other => Err(EngineError::UnsupportedEngine(other.to_string())),
        }
    }

    fn connection_string(&self, config: &SystemConfig) -> EngineResult<String> {
        if let Some(verbatim) = config.param("connection_string") {
            return Ok(verbatim.to_string());
        }
        match self.kind {
            EngineKind::SqlServer => mssql_connection_string(config),
            _ => duckdb_connection_string(config),
        }
    }

    fn classify(&self, data_type: &str) -> Option<ColumnType> {
        if data_type.trim().is_empty() {
            return None;
        }
        Some(match self.kind {
            EngineKind::SqlServer => classify_sqlserver_type(data_type),
            _ => classify_duckdb_type(data_type),
        })
    }
}

#[async_trait]
impl Adapter for WorkerAdapter {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    #[tracing::instrument(name = "worker.execute", skip_all, fields(system = %config.name, engine = %self.kind))]
    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let query = ensure_query(config, query)?;
        let driver = self.driver()?;
        let connection_string = self.connection_string(config)?;

        let mut client = self
            .launcher
            .spawn()
            .await
            .map_err(|e| classify_worker_error(&config.name, e))?;
        let response = client
            .execute_query(driver, &connection_string, query, cancel)
            .await;
        client.shutdown().await;
        info!("worker released");

        let response = response.map_err(|e| classify_worker_error(&config.name, e))?;

        let fields: Vec<FieldDescriptor> = response
            .columns
            .iter()
            .map(|column| match self.classify(&column.data_type) {
                Some(kind) => FieldDescriptor::typed(&column.name, &column.data_type, kind),
                None => FieldDescriptor::untyped(&column.name),
            })
            .collect();

        let date_columns: Vec<bool> = response
            .columns
            .iter()
            .map(|c| c.data_type.trim().eq_ignore_ascii_case("DATE"))
            .collect();
        let numeric_columns: Vec<bool> = fields
            .iter()
            .map(|f| f.kind.is_some_and(|k| k.is_numeric()))
            .collect();

        let rows = response
            .rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .enumerate()
                    .map(|(i, value)| {
                        decode_value(
                            value,
                            date_columns.get(i).copied().unwrap_or(false),
                            numeric_columns.get(i).copied().unwrap_or(false),
                        )
                    })
                    .collect()
            })
            .collect();

        let mut raw = RawEngineResult::new(fields, rows);
        raw.infer_missing_kinds(&config.name);
        Ok(raw)
    }
}

fn classify_worker_error(system: &str, err: WorkerError) -> EngineError {
    match err {
        WorkerError::Timeout(after) => EngineError::Timeout {
            system: system.to_string(),
            after,
        },
        WorkerError::Cancelled => EngineError::cancelled(system),
        err if err.is_connection_failure() => EngineError::connection(system, err),
        err => EngineError::query(system, err),
    }
}

/// Worker JSON cell to a native value.
///
/// DATE cells often arrive as midnight RFC 3339 timestamps and are cut to
/// the date. Numeric columns delivered as strings keep their exact text.
fn decode_value(value: Value, is_date: bool, is_numeric: bool) -> NativeValue {
    match value {
        Value::String(text) if is_date => {
            NativeValue::Text(rfc3339_to_date(&text).unwrap_or(text))
        }
        Value::String(text) if is_numeric => NativeValue::Decimal(text),
        other => NativeValue::from_json(other),
    }
}

fn mssql_connection_string(config: &SystemConfig) -> EngineResult<String> {
    let host = require(config, "host")?;
    let database = require(config, "database")?;

    let authority = match config.port {
        Some(port) => format!("sqlserver://{host}:{port}"),
        None => format!("sqlserver://{host}"),
    };

    let mut params = vec![format!("database={database}")];
    match (config.param("username"), config.param("password")) {
        (Some(user), Some(password)) => {
            params.push(format!("user id={user}"));
            params.push(format!("password={password}"));
        }
        (Some(user), None) => params.push(format!("user id={user}")),
        _ => params.push("trusted_connection=true".to_string()),
    }
    if config.ssl {
        params.push("encrypt=true".to_string());
    }
    if config.trust_server_certificate.unwrap_or(true) {
        params.push("TrustServerCertificate=true".to_string());
    }

    Ok(format!("{authority}?{}", params.join("&")))
}

fn duckdb_connection_string(config: &SystemConfig) -> EngineResult<String> {
    Ok(config.param("path").unwrap_or(":memory:").to_string())
}

/// Map a SQL Server type name to a column type.
pub fn classify_sqlserver_type(type_name: &str) -> ColumnType {
    match base_type(type_name).as_str() {
        "TINYINT" | "SMALLINT" | "INT" | "BIGINT" | "DECIMAL" | "NUMERIC" | "FLOAT" | "REAL"
        | "MONEY" | "SMALLMONEY" => ColumnType::Float,
        _ => ColumnType::String,
    }
}

/// Map a DuckDB type name to a column type.
pub fn classify_duckdb_type(type_name: &str) -> ColumnType {
    match base_type(type_name).as_str() {
        "TINYINT" | "SMALLINT" | "INTEGER" | "INT" | "BIGINT" | "HUGEINT" | "UTINYINT"
        | "USMALLINT" | "UINTEGER" | "UBIGINT" | "UHUGEINT" | "FLOAT" | "DOUBLE" | "REAL"
        | "DECIMAL" | "NUMERIC" => ColumnType::Float,
        _ => ColumnType::String,
    }
}

/// Uppercased type name without precision, e.g. `DECIMAL(18,2)` to `DECIMAL`.
fn base_type(type_name: &str) -> String {
    let upper = type_name.trim().to_ascii_uppercase();
    match upper.find('(') {
        Some(paren) => upper[..paren].trim_end().to_string(),
        None => upper,
    }
}
