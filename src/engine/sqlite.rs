//! SQLite adapter running `rusqlite` on a blocking thread.
//!
//! Databases are opened read-only; a missing file is a connection error, never
//! an empty database. Cancellation interrupts the running statement.

use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ensure_query, require, Adapter, EngineError, EngineKind, EngineResult};
use super::{FieldDescriptor, NativeValue, RawEngineResult};
use crate::config::SystemConfig;
use crate::tabular::ColumnType;

/// Map a declared column type to a column type by SQLite's affinity words.
pub fn classify_decltype(declared: &str) -> ColumnType {
    let upper = declared.to_ascii_uppercase();
    let numeric = ["INT", "REAL", "FLOA", "DOUB", "NUMERIC", "DECIMAL"]
        .iter()
        .any(|word| upper.contains(word));
    if numeric {
        ColumnType::Float
    } else {
        ColumnType::String
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

#[async_trait]
impl Adapter for SqliteAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Sqlite
    }

    #[tracing::instrument(name = "sqlite.execute", skip_all, fields(system = %config.name))]
    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let query = ensure_query(config, query)?.to_string();
        let path = require(config, "path")?.to_string();
        let system = config.name.clone();

        let (handle_tx, mut handle_rx) = oneshot::channel();
        let task = {
            let system = system.clone();
            tokio::task::spawn_blocking(move || run_query(&system, &path, &query, handle_tx))
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            handle = &mut handle_rx => Some(handle.ok()),
        };
        let Some(handle) = opened else {
            // The connection may still open; interrupt it as soon as it does.
            tokio::spawn(async move {
                if let Ok(handle) = handle_rx.await {
                    debug!("interrupting sqlite statement");
                    handle.interrupt();
                }
            });
            return Err(EngineError::cancelled(&system));
        };

        // Interrupts the statement if this future is dropped mid-query.
        let mut guard = InterruptGuard(handle);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::cancelled(&system)),
            joined = task => {
                guard.disarm();
                joined.unwrap_or_else(|e| Err(EngineError::query(&system, e)))
            }
        };

        let mut raw = outcome?;
        raw.infer_missing_kinds(&system);
        Ok(raw)
    }
}

struct InterruptGuard(Option<InterruptHandle>);

impl InterruptGuard {
    fn disarm(&mut self) {
        self.0 = None;
    }
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            debug!("interrupting sqlite statement");
            handle.interrupt();
        }
    }
}

fn run_query(
    system: &str,
    path: &str,
    query: &str,
    handle_tx: oneshot::Sender<InterruptHandle>,
) -> EngineResult<RawEngineResult> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|e| EngineError::connection(system, format!("{path}: {e}")))?;
    info!(path, "opened database");

    // The receiver is gone if the caller already gave up.
    let _ = handle_tx.send(conn.get_interrupt_handle());

    let raw = read_rows(&conn, query).map_err(|e| EngineError::query(system, e));

    if let Err((_, err)) = conn.close() {
        debug!(error = %err, "error while closing database");
    }
    raw
}

fn read_rows(conn: &Connection, query: &str) -> rusqlite::Result<RawEngineResult> {
    let mut statement = conn.prepare(query)?;

    let fields: Vec<FieldDescriptor> = statement
        .columns()
        .iter()
        .map(|column| match column.decl_type() {
            Some(declared) => {
                FieldDescriptor::typed(column.name(), declared, classify_decltype(declared))
            }
            None => FieldDescriptor::untyped(column.name()),
        })
        .collect();

    let width = fields.len();
    let mut rows = Vec::new();
    let mut cursor = statement.query([])?;
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(width);
        for index in 0..width {
            values.push(native_value(row.get_ref(index)?));
        }
        rows.push(values);
    }

    Ok(RawEngineResult::new(fields, rows))
}

fn native_value(value: ValueRef<'_>) -> NativeValue {
    match value {
        ValueRef::Null => NativeValue::Null,
        ValueRef::Integer(i) => NativeValue::Int(i),
        ValueRef::Real(f) => NativeValue::Float(f),
        ValueRef::Text(bytes) => NativeValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => NativeValue::Bytes(bytes.to_vec()),
    }
}
