//! MySQL adapter over a single `sqlx` connection.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow, MySqlSslMode};
use sqlx::{Column, Connection, Executor, MySql, Row, Statement, TypeInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::temporal::{format_date, format_naive_datetime, format_time, format_zoned};
use super::{ensure_query, require, Adapter, EngineError, EngineKind, EngineResult};
use super::{FieldDescriptor, NativeValue, RawEngineResult};
use crate::config::SystemConfig;
use crate::tabular::ColumnType;

pub const DEFAULT_PORT: u16 = 3306;

/// Map a MySQL type name (as `sqlx` reports it) to a column type.
///
/// Integer types are FLOAT whether signed or unsigned.
pub fn classify_type(type_name: &str) -> ColumnType {
    let upper = type_name.trim().to_ascii_uppercase();
    let base = upper.strip_suffix(" UNSIGNED").unwrap_or(&upper);
    match base {
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" | "DECIMAL"
        | "NUMERIC" | "FLOAT" | "DOUBLE" | "REAL" | "YEAR" => ColumnType::Float,
        _ => ColumnType::String,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlAdapter;

#[async_trait]
impl Adapter for MySqlAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::MySql
    }

    #[tracing::instrument(name = "mysql.execute", skip_all, fields(system = %config.name))]
    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let query = ensure_query(config, query)?;
        let options = connect_options(config)?;

        let mut conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::cancelled(&config.name)),
            connected = MySqlConnection::connect_with(&options) => {
                connected.map_err(|e| EngineError::connection(&config.name, e))?
            }
        };
        info!("connected");

        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            fetched = fetch(&mut conn, query) => Some(fetched),
        };
        // Closed on every path, including cancellation mid-statement.
        if let Err(err) = conn.close().await {
            debug!(error = %err, "error while closing connection");
        }
        info!("connection closed");

        let fetched = fetched.ok_or_else(|| EngineError::cancelled(&config.name))?;
        let (fields, rows) = fetched.map_err(|e| classify_error(&config.name, e))?;
        let rows = rows
            .iter()
            .map(|row| {
                fields
                    .iter()
                    .enumerate()
                    .map(|(i, field)| decode_cell(row, i, field.native_type.as_deref().unwrap_or("")))
                    .collect()
            })
            .collect();

        Ok(RawEngineResult::new(fields, rows))
    }
}

fn connect_options(config: &SystemConfig) -> EngineResult<MySqlConnectOptions> {
    let host = require(config, "host")?;
    let database = require(config, "database")?;
    let username = require(config, "username")?;

    let mut options = MySqlConnectOptions::new()
        .host(host)
        .port(config.port.unwrap_or(DEFAULT_PORT))
        .database(database)
        .username(username)
        .ssl_mode(if config.ssl {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Preferred
        });
    if let Some(password) = config.param("password") {
        options = options.password(password);
    }
    Ok(options)
}

async fn fetch(
    conn: &mut MySqlConnection,
    query: &str,
) -> Result<(Vec<FieldDescriptor>, Vec<MySqlRow>), sqlx::Error> {
    let statement = (&mut *conn).prepare(query).await?;
    let fields = statement
        .columns()
        .iter()
        .map(|column| {
            let type_name = column.type_info().name().to_string();
            let kind = classify_type(&type_name);
            FieldDescriptor::typed(column.name(), type_name, kind)
        })
        .collect();
    let rows = statement.query().fetch_all(&mut *conn).await?;
    Ok((fields, rows))
}

fn classify_error(system: &str, err: sqlx::Error) -> EngineError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => EngineError::connection(system, err),
        other => EngineError::query(system, other),
    }
}

fn decode<'r, T>(
    row: &'r MySqlRow,
    index: usize,
    wrap: impl FnOnce(T) -> NativeValue,
) -> Result<NativeValue, sqlx::Error>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    Ok(row
        .try_get::<Option<T>, _>(index)?
        .map(wrap)
        .unwrap_or(NativeValue::Null))
}

fn decode_cell(row: &MySqlRow, index: usize, type_name: &str) -> NativeValue {
    let decoded = match type_name {
        "BOOLEAN" => decode(row, index, NativeValue::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            decode(row, index, NativeValue::Int)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "BIT" => decode(row, index, NativeValue::UInt),
        // YEAR has no checked decoder; it arrives as a two-byte integer
        "YEAR" => row
            .try_get_unchecked::<Option<u16>, _>(index)
            .map(|v| v.map_or(NativeValue::Null, |y| NativeValue::UInt(y.into()))),
        "DECIMAL" => decode(row, index, |v: sqlx::types::Decimal| {
            NativeValue::Decimal(v.to_string())
        }),
        "FLOAT" => decode(row, index, |v: f32| {
            NativeValue::Float(v.to_string().parse().unwrap_or(f64::from(v)))
        }),
        "DOUBLE" => decode(row, index, NativeValue::Float),
        "DATE" => decode(row, index, |v| NativeValue::Text(format_date(v))),
        "TIME" => decode(row, index, |v| NativeValue::Text(format_time(v))),
        "DATETIME" => decode(row, index, |v| NativeValue::Text(format_naive_datetime(v))),
        "TIMESTAMP" => decode(row, index, |v: chrono::DateTime<chrono::Utc>| {
            NativeValue::Text(format_zoned(&v))
        }),
        "JSON" => decode(row, index, NativeValue::Json),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            decode(row, index, NativeValue::Bytes)
        }
        _ => decode(row, index, NativeValue::Text),
    };

    decoded.unwrap_or_else(|err| {
        debug!(column = index, type_name, error = %err, "falling back to text decoding");
        match row.try_get_unchecked::<Option<String>, _>(index) {
            Ok(Some(text)) => NativeValue::Text(text),
            _ => NativeValue::Null,
        }
    })
}
