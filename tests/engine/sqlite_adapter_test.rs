//! SQLite adapter against scratch database files.

use std::path::Path;

use rusqlite::Connection;
use tabula::config::SystemConfig;
use tabula::engine::sqlite::SqliteAdapter;
use tabula::engine::{Adapter, EngineError, NativeValue, TypeOrigin};
use tabula::tabular::{normalize, ColumnType};
use tokio_util::sync::CancellationToken;

fn seed(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        "CREATE TABLE sales (id INTEGER, region TEXT, total REAL, note VARCHAR(20));
         INSERT INTO sales VALUES (1, 'north', 10.5, 'first');
         INSERT INTO sales VALUES (2, 'south', 4.0, NULL);",
    )
    .unwrap();
}

fn system(path: &Path) -> SystemConfig {
    let mut config = SystemConfig::new("lite", "sqlite");
    config.path = Some(path.display().to_string());
    config
}

#[tokio::test]
async fn test_declared_types_are_classified() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path);

    let raw = SqliteAdapter
        .execute(&system(&path), "SELECT id, region, total, note FROM sales ORDER BY id", &CancellationToken::new())
        .await
        .unwrap();

    let kinds: Vec<Option<ColumnType>> = raw.fields.iter().map(|f| f.kind).collect();
    assert_eq!(
        kinds,
        [Some(ColumnType::Float), Some(ColumnType::String), Some(ColumnType::Float), Some(ColumnType::String)]
    );
    assert!(raw.fields.iter().all(|f| f.origin == TypeOrigin::Schema));
    assert_eq!(raw.rows[1][3], NativeValue::Null);

    let out = normalize("lite", "q", raw);
    assert_eq!(out.result.row(0).unwrap().values(), ["1", "north", "10.5", "first"]);
    assert_eq!(out.result.row(1).unwrap().values(), ["2", "south", "4", ""]);
    assert_eq!(out.warnings.len(), 1);
}

#[tokio::test]
async fn test_expressions_are_inferred_from_first_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path);

    let raw = SqliteAdapter
        .execute(&system(&path), "SELECT 1 AS n, 'x' AS s", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(raw.fields[0].kind, Some(ColumnType::Float));
    assert_eq!(raw.fields[1].kind, Some(ColumnType::String));
    assert_eq!(raw.fields[0].origin, TypeOrigin::Inferred);
    assert_eq!(raw.warnings.len(), 2);
}

#[tokio::test]
async fn test_missing_file_is_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SqliteAdapter
        .execute(&system(&dir.path().join("absent.db")), "SELECT 1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Connection { .. }));
    assert!(!dir.path().join("absent.db").exists());
}

#[tokio::test]
async fn test_database_is_read_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path);

    let err = SqliteAdapter
        .execute(&system(&path), "DELETE FROM sales", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Query { .. }));

    let count: i64 = Connection::open(&path)
        .unwrap()
        .query_row("SELECT COUNT(*) FROM sales", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn test_bad_sql_and_missing_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path);

    let err = SqliteAdapter
        .execute(&system(&path), "SELECT FROM WHERE", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Query { .. }));

    let err = SqliteAdapter
        .execute(&SystemConfig::new("lite", "sqlite"), "SELECT 1", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::IncompleteConfig { parameter: "path", .. }));
}

#[tokio::test]
async fn test_cancel_before_connection_opens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = SqliteAdapter
        .execute(&system(&path), "SELECT id FROM sales", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }));
}

#[tokio::test]
async fn test_cancel_interrupts_running_statement() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sales.db");
    seed(&path);
    let cancel = CancellationToken::new();

    // Counts to a billion; only an interrupt ends it quickly.
    let endless = "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 1000000000) \
                   SELECT COUNT(*) FROM c";
    let config = system(&path);
    let started = std::time::Instant::now();
    let (result, ()) = tokio::join!(SqliteAdapter.execute(&config, endless, &cancel), async {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
    });

    assert!(matches!(result, Err(EngineError::Cancelled { .. })));
    assert!(started.elapsed() < std::time::Duration::from_secs(10));
}
