//! Routing and execution policy with stub adapters.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tabula::config::SystemConfig;
use tabula::engine::{
    Adapter, AdapterRegistry, EngineError, EngineKind, EngineResult, ExecutionPolicy, FieldDescriptor,
    NativeValue, QueryExecutor, RawEngineResult, RetryPolicy,
};
use tabula::tabular::ColumnType;
use tokio_util::sync::CancellationToken;

/// What the stub does on each call.
#[derive(Clone, Copy)]
enum Behavior {
    Answer,
    /// Fail with a connection error this many times, then answer.
    FlakyConnection(u32),
    QueryFailure,
    Hang,
}

struct StubAdapter {
    kind: EngineKind,
    behavior: Behavior,
    calls: AtomicU32,
}

impl StubAdapter {
    fn new(kind: EngineKind, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for StubAdapter {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn execute(
        &self,
        config: &SystemConfig,
        _query: &str,
        _cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match self.behavior {
            Behavior::Answer => Ok(one_row()),
            Behavior::FlakyConnection(failures) if call <= failures => {
                Err(EngineError::connection(&config.name, "connection refused"))
            }
            Behavior::FlakyConnection(_) => Ok(one_row()),
            Behavior::QueryFailure => Err(EngineError::query(&config.name, "syntax error")),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(one_row())
            }
        }
    }
}

fn one_row() -> RawEngineResult {
    RawEngineResult::new(
        vec![FieldDescriptor::typed("n", "INT8", ColumnType::Float)],
        vec![vec![NativeValue::Int(1)]],
    )
}

fn executor(adapter: Arc<StubAdapter>, policy: ExecutionPolicy) -> QueryExecutor {
    let mut registry = AdapterRegistry::new();
    registry.register(adapter);
    QueryExecutor::new(Arc::new(registry), policy)
}

fn fast_policy(max_attempts: u32) -> ExecutionPolicy {
    ExecutionPolicy {
        timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        },
    }
}

#[test]
fn test_dispatch_ignores_case() {
    let mut registry = AdapterRegistry::new();
    registry.register(StubAdapter::new(EngineKind::BigQuery, Behavior::Answer));

    let mixed = registry.resolve("BigQuery").unwrap();
    let lower = registry.resolve("bigquery").unwrap();
    assert!(Arc::ptr_eq(&mixed, &lower));
    assert_eq!(mixed.kind(), EngineKind::BigQuery);
}

#[test]
fn test_unknown_engine_is_unsupported() {
    let settings = tabula::config::Settings::default();
    let registry = AdapterRegistry::with_defaults(&settings);

    let err = registry.route(&SystemConfig::new("legacy", "oracle")).err().unwrap();
    assert!(matches!(err, EngineError::UnsupportedEngine(tag) if tag == "oracle"));
    assert_eq!(registry.kinds(), EngineKind::ALL);
}

#[tokio::test]
async fn test_run_normalizes() {
    let adapter = StubAdapter::new(EngineKind::Postgres, Behavior::Answer);
    let outcome = executor(adapter, fast_policy(1))
        .run(&SystemConfig::new("orders", "postgres"), "SELECT 1 AS n", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.result.columns(), ["n"]);
    assert_eq!(outcome.result.row(0).unwrap().get("n"), Some("1"));
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_connection_errors_are_retried() {
    let adapter = StubAdapter::new(EngineKind::Postgres, Behavior::FlakyConnection(2));
    let outcome = executor(adapter.clone(), fast_policy(3))
        .run(&SystemConfig::new("orders", "postgres"), "SELECT 1", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 3);
    assert_eq!(adapter.calls(), 3);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let adapter = StubAdapter::new(EngineKind::Postgres, Behavior::FlakyConnection(10));
    let err = executor(adapter.clone(), fast_policy(3))
        .run(&SystemConfig::new("orders", "postgres"), "SELECT 1", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Connection { .. }));
    assert_eq!(adapter.calls(), 3);
}

#[tokio::test]
async fn test_query_errors_are_not_retried() {
    let adapter = StubAdapter::new(EngineKind::MySql, Behavior::QueryFailure);
    let err = executor(adapter.clone(), fast_policy(3))
        .run(&SystemConfig::new("shop", "mysql"), "SELEC 1", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Query { .. }));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_slow_query_times_out() {
    let adapter = StubAdapter::new(EngineKind::Snowflake, Behavior::Hang);
    let policy = ExecutionPolicy {
        timeout: Duration::from_millis(50),
        retry: RetryPolicy::default(),
    };

    let err = executor(adapter.clone(), policy)
        .run(&SystemConfig::new("lake", "snowflake"), "SELECT 1", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Timeout { after, .. } if after == Duration::from_millis(50)));
    assert_eq!(adapter.calls(), 1);
}

#[tokio::test]
async fn test_cancellation_stops_a_running_query() {
    let adapter = StubAdapter::new(EngineKind::Postgres, Behavior::Hang);
    let executor = executor(adapter, fast_policy(1));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let err = executor
        .run(&SystemConfig::new("orders", "postgres"), "SELECT 1", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Cancelled { .. }));
}
