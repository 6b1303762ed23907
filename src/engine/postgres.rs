//! PostgreSQL adapter over a single `sqlx` connection.

use async_trait::async_trait;
use sqlx::postgres::types::{Oid, PgMoney};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Executor, Postgres, Row, Statement, TypeInfo};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::temporal::{format_date, format_naive_datetime, format_time, format_zoned};
use super::{ensure_query, require, Adapter, EngineError, EngineKind, EngineResult};
use super::{FieldDescriptor, NativeValue, RawEngineResult};
use crate::config::SystemConfig;
use crate::tabular::ColumnType;

pub const DEFAULT_PORT: u16 = 5432;

/// Map a PostgreSQL type name to a column type.
pub fn classify_type(type_name: &str) -> ColumnType {
    match type_name.trim().to_ascii_uppercase().as_str() {
        "INT2" | "INT4" | "INT8" | "OID" | "FLOAT4" | "FLOAT8" | "NUMERIC" | "MONEY" => {
            ColumnType::Float
        }
        _ => ColumnType::String,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

#[async_trait]
impl Adapter for PostgresAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Postgres
    }

    #[tracing::instrument(name = "postgres.execute", skip_all, fields(system = %config.name))]
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
            connected = PgConnection::connect_with(&options) => {
                connected.map_err(|e| EngineError::connection(&config.name, e))?
            }
        };
        info!(host = options.get_host(), "connected");

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

fn connect_options(config: &SystemConfig) -> EngineResult<PgConnectOptions> {
    let host = require(config, "host")?;
    let database = require(config, "database")?;
    let username = require(config, "username")?;

    let mut options = PgConnectOptions::new()
        .host(host)
        .port(config.port.unwrap_or(DEFAULT_PORT))
        .database(database)
        .username(username)
        .ssl_mode(if config.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        });
    if let Some(password) = config.param("password") {
        options = options.password(password);
    }
    Ok(options)
}

/// Prepare first so column metadata is known even for empty results.
async fn fetch(
    conn: &mut PgConnection,
    query: &str,
) -> Result<(Vec<FieldDescriptor>, Vec<PgRow>), sqlx::Error> {
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
    row: &'r PgRow,
    index: usize,
    wrap: impl FnOnce(T) -> NativeValue,
) -> Result<NativeValue, sqlx::Error>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    Ok(row
        .try_get::<Option<T>, _>(index)?
        .map(wrap)
        .unwrap_or(NativeValue::Null))
}

fn decode_cell(row: &PgRow, index: usize, type_name: &str) -> NativeValue {
    let decoded = match type_name {
        "BOOL" => decode(row, index, NativeValue::Bool),
        "INT2" => decode(row, index, |v: i16| NativeValue::Int(v.into())),
        "INT4" => decode(row, index, |v: i32| NativeValue::Int(v.into())),
        "INT8" => decode(row, index, NativeValue::Int),
        "OID" => decode(row, index, |v: Oid| NativeValue::Int(v.0.into())),
        // Display gives the shortest f32 text, which widens without noise
        "FLOAT4" => decode(row, index, |v: f32| {
            NativeValue::Float(v.to_string().parse().unwrap_or(f64::from(v)))
        }),
        "FLOAT8" => decode(row, index, NativeValue::Float),
        "NUMERIC" => decode(row, index, |v: sqlx::types::Decimal| {
            NativeValue::Decimal(v.to_string())
        }),
        "MONEY" => decode(row, index, |v: PgMoney| {
            NativeValue::Decimal(v.to_decimal(2).to_string())
        }),
        "DATE" => decode(row, index, |v| NativeValue::Text(format_date(v))),
        "TIME" => decode(row, index, |v| NativeValue::Text(format_time(v))),
        "TIMESTAMP" => decode(row, index, |v| NativeValue::Text(format_naive_datetime(v))),
        "TIMESTAMPTZ" => decode(row, index, |v: chrono::DateTime<chrono::Utc>| {
            NativeValue::Text(format_zoned(&v))
        }),
        "UUID" => decode(row, index, |v: sqlx::types::Uuid| NativeValue::Text(v.to_string())),
        "JSON" | "JSONB" => decode(row, index, NativeValue::Json),
        "BYTEA" => decode(row, index, NativeValue::Bytes),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_numeric_types() {
        for name in ["INT2", "INT4", "int8", "OID", "FLOAT4", "FLOAT8", "NUMERIC", "MONEY"] {
            assert_eq!(classify_type(name), ColumnType::Float, "{name}");
        }
    }

    #[test]
    fn test_classify_everything_else_as_string() {
        for name in ["TEXT", "VARCHAR", "DATE", "TIMESTAMPTZ", "BOOL", "JSONB", "INT4[]", "UUID"] {
            assert_eq!(classify_type(name), ColumnType::String, "{name}");
        }
    }

    #[test]
    fn test_connect_options_require_host_database_and_user() {
        let mut config = SystemConfig::new("orders", "postgres");
        config.host = Some("db.internal".into());
        config.database = Some("orders".into());
        assert!(matches!(
            connect_options(&config),
            Err(EngineError::IncompleteConfig { parameter: "username", .. })
        ));

        config.username = Some("report".into());
        let options = connect_options(&config).unwrap();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), DEFAULT_PORT);
    }

    #[tokio::test]
    async fn test_cancel_wins_over_connecting() {
        let mut config = SystemConfig::new("orders", "postgres");
        config.host = Some("127.0.0.1".into());
        config.port = Some(1);
        config.database = Some("orders".into());
        config.username = Some("report".into());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = PostgresAdapter
            .execute(&config, "SELECT 1", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }), "{err}");
    }
}
