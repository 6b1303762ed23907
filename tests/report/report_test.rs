//! Report runs end to end over SQLite and stub engines.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tabula::config::{Settings, SystemConfig};
use tabula::engine::sqlite::SqliteAdapter;
use tabula::engine::{
    Adapter, AdapterRegistry, EngineError, EngineKind, EngineResult, FieldDescriptor, NativeValue,
    RawEngineResult,
};
use tabula::report::{ReportDefinition, ReportError, ReportRunner};
use tabula::tabular::Warning;
use tokio_util::sync::CancellationToken;

/// Answers `SELECT <n>` after `<n>` milliseconds with one row holding `n`,
/// so later items can finish first.
struct DelayAdapter {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Adapter for DelayAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::BigQuery
    }

    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        _cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let n: u64 = query
            .trim()
            .strip_prefix("SELECT ")
            .and_then(|rest| rest.parse().ok())
            .ok_or_else(|| EngineError::query(&config.name, "unexpected query"))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(n)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        // No schema: the type is inferred from the first row.
        Ok(RawEngineResult::new(
            vec![FieldDescriptor::untyped("n")],
            vec![vec![NativeValue::Int(n as i64)]],
        ))
    }
}

fn write_fixture(dir: &Path) {
    let conn = rusqlite::Connection::open(dir.join("orders.db")).unwrap();
    conn.execute_batch(
        "CREATE TABLE sales (region TEXT, total REAL);
         INSERT INTO sales VALUES ('north', 10.5), ('south', 4), ('north', 2);",
    )
    .unwrap();

    fs::create_dir_all(dir.join("queries")).unwrap();
    fs::write(
        dir.join("queries/by_region.sql"),
        "SELECT region, SUM(total) AS total FROM sales GROUP BY region ORDER BY region",
    )
    .unwrap();
    fs::create_dir_all(dir.join("charts")).unwrap();
    fs::write(
        dir.join("charts/revenue.json"),
        r#"{"mark": "bar", "encoding": {"x": {"field": "region"}, "y": {"field": "total"}}}"#,
    )
    .unwrap();
}

fn settings(dir: &Path, max_concurrent_queries: usize) -> Settings {
    let toml = format!(
        r#"
[systems.Orders]
engine = "sqlite"
path = "{db}"

[systems.warehouse]
engine = "BigQuery"
project_id = "acme"

[execution]
query_timeout = "5s"
max_concurrent_queries = {max_concurrent_queries}

[charts]
output_dir = "{out}"
default_width = 320
default_height = 200
"#,
        db = dir.join("orders.db").display(),
        out = dir.join("out").display(),
    );
    Settings::parse(&toml).unwrap()
}

fn runner(dir: &Path, max_concurrent_queries: usize) -> (ReportRunner, Arc<DelayAdapter>) {
    let delay = Arc::new(DelayAdapter {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(SqliteAdapter));
    registry.register(delay.clone());
    let runner = ReportRunner::with_registry(settings(dir, max_concurrent_queries), registry).unwrap();
    (runner, delay)
}

const REPORT: &str = r#"
name = "Daily sales"
default_system = "orders"

[[data]]
name = "by_region"
query_file = "queries/by_region.sql"

[[data]]
system = "warehouse"
query = "SELECT 60"

[[data]]
system = "warehouse"
query = "SELECT 5"

[[chart]]
title = "Revenue by region"
cid = "revenue"
query_file = "queries/by_region.sql"
spec_file = "charts/revenue.json"

[[chart]]
title = "Broken"
query = "SELECT region FROM sales"
spec = '{"mark": "bar", "encoding": {"x": {"field": "missing_column"}}}'

[[chart]]
query = "SELECT 1"
system = "warehouse"
spec = "{ not json"
"#;

#[tokio::test]
async fn test_report_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    fs::write(dir.path().join("report.toml"), REPORT).unwrap();

    let (definition, base_dir) = ReportDefinition::load(dir.path()).unwrap();
    let (runner, delay) = runner(dir.path(), 2);
    let output = runner
        .run(&definition, &base_dir, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.name, "Daily sales");

    // Declaration order, not completion order.
    let systems: Vec<&str> = output.data.iter().map(|d| d.system.as_str()).collect();
    assert_eq!(systems, ["orders", "warehouse", "warehouse"]);
    assert_eq!(output.data[1].result.row(0).unwrap().get("n"), Some("60"));
    assert_eq!(output.data[2].result.row(0).unwrap().get("n"), Some("5"));
    assert!(delay.peak.load(Ordering::SeqCst) <= 2);

    let by_region = serde_json::to_value(&output.data[0]).unwrap();
    assert_eq!(by_region["name"], json!("by_region"));
    assert_eq!(by_region["columns"], json!(["region", "total"]));
    assert_eq!(
        by_region["rows"],
        json!([{"region": "north", "total": "12.5"}, {"region": "south", "total": "4"}])
    );

    // Only the first chart survives; the others are listed as failures.
    assert_eq!(output.charts.len(), 1);
    let chart = &output.charts[0];
    assert_eq!(chart.cid, "revenue");
    assert_eq!(chart.spec["data"]["values"][0]["region"], json!("north"));
    let path = chart.path.as_ref().unwrap();
    assert!(path.starts_with(dir.path().join("out")));
    assert_eq!(&fs::read(path).unwrap()[..4], b"\x89PNG");

    let failures: Vec<(usize, &str)> = output
        .chart_failures
        .iter()
        .map(|f| (f.index, f.cid.as_str()))
        .collect();
    assert_eq!(failures, [(1, "chart_1"), (2, "chart_2")]);

    // Three untyped warehouse results, each inferred once.
    let inferred = output
        .warnings
        .iter()
        .filter(|w| matches!(w, Warning::SchemaInference { system, .. } if system == "warehouse"))
        .count();
    assert_eq!(inferred, 3);
}

#[tokio::test]
async fn test_sequential_by_default() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let definition = ReportDefinition::from_toml(
        r#"
name = "Serial"
default_system = "warehouse"
[[data]]
query = "SELECT 20"
[[data]]
query = "SELECT 10"
"#,
    )
    .unwrap();

    let (runner, delay) = runner(dir.path(), 1);
    let output = runner
        .run(&definition, dir.path(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.data.len(), 2);
    assert_eq!(delay.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_query_failure_aborts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let definition = ReportDefinition::from_toml(
        r#"
name = "Broken"
default_system = "orders"
[[data]]
query = "SELECT nope FROM nowhere"
[[chart]]
query = "SELECT region, total FROM sales"
spec = '{"mark": "bar", "encoding": {"x": {"field": "region"}}}'
"#,
    )
    .unwrap();

    let (runner, _) = runner(dir.path(), 2);
    let err = runner
        .run(&definition, dir.path(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ReportError::Engine(EngineError::Query { .. })));
    assert!(!dir.path().join("out").exists());
}

#[tokio::test]
async fn test_unsupported_engine_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let mut settings = settings(dir.path(), 1);
    settings
        .systems
        .insert("legacy".into(), SystemConfig::new("legacy", "oracle"));

    let definition = ReportDefinition::from_toml(
        r#"
name = "Legacy"
[[data]]
system = "legacy"
query = "SELECT 1 FROM dual"
"#,
    )
    .unwrap();

    let runner = ReportRunner::new(settings).unwrap();
    let err = runner
        .run(&definition, dir.path(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ReportError::Engine(EngineError::UnsupportedEngine(tag)) if tag == "oracle"));
}

fn pngs_in(dir: &Path) -> Vec<std::path::PathBuf> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_cancel_during_rendering_removes_written_charts() {
    let dir = tempfile::tempdir().unwrap();
    write_fixture(dir.path());
    let out = dir.path().join("out");

    // The small chart lands first; the large one is still rasterizing when
    // the run is cancelled.
    let definition = ReportDefinition::from_toml(
        r#"
name = "Interrupted"
default_system = "warehouse"

[[chart]]
cid = "small"
query = "SELECT 1"
spec = '{"mark": "bar", "encoding": {"x": {"field": "n"}, "y": {"field": "n"}}}'

[[chart]]
cid = "large"
query = "SELECT 1"
spec = '{"mark": "bar", "width": 4000, "height": 3000, "encoding": {"x": {"field": "n"}, "y": {"field": "n"}}}'
"#,
    )
    .unwrap();

    let mut settings = settings(dir.path(), 2);
    settings.charts.max_concurrent_renders = 2;
    let mut registry = AdapterRegistry::new();
    registry.register(Arc::new(DelayAdapter {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    }));
    let runner = ReportRunner::with_registry(settings, registry).unwrap();

    let cancel = CancellationToken::new();
    let cancel_after_first_chart = async {
        for _ in 0..5_000 {
            if !pngs_in(&out).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        cancel.cancel();
    };

    let (result, ()) = tokio::join!(
        runner.run(&definition, dir.path(), &cancel),
        cancel_after_first_chart
    );

    assert!(matches!(result, Err(ReportError::Cancelled)));
    assert!(pngs_in(&out).is_empty(), "{:?}", pngs_in(&out));
}
