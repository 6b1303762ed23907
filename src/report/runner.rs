//! Executes one report: queries first, then charts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::future::join_all;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::definition::{ReportDefinition, ResolvedQuery};
use super::{ReportError, ReportResult};
use crate::chart::{prepare, ChartDescriptor, ChartRenderer};
use crate::config::{Settings, SystemConfig};
use crate::engine::{AdapterRegistry, EngineError, QueryExecutor, QueryOutcome};
use crate::tabular::{UniversalTabularResult, Warning};

/// The result of a data item.
#[derive(Debug, Clone, Serialize)]
pub struct DataOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub system: String,
    #[serde(flatten)]
    pub result: UniversalTabularResult,
}

/// A chart that was left out of the report.
#[derive(Debug, Clone, Serialize)]
pub struct ChartFailure {
    /// Position among the definition's chart items.
    pub index: usize,
    pub cid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub error: String,
}

/// Everything a template compiler needs to assemble the report.
#[derive(Debug, Clone, Serialize)]
pub struct ReportOutput {
    pub name: String,
    /// In declaration order.
    pub data: Vec<DataOutput>,
    /// Charts that rendered, in declaration order.
    pub charts: Vec<ChartDescriptor>,
    pub chart_failures: Vec<ChartFailure>,
    pub warnings: Vec<Warning>,
}

/// Runs report definitions against the configured systems.
pub struct ReportRunner {
    settings: Settings,
    executor: QueryExecutor,
    renderer: ChartRenderer,
    max_concurrent_queries: usize,
    output_dir: PathBuf,
}

impl ReportRunner {
    /// A runner over the default adapters.
    pub fn new(settings: Settings) -> ReportResult<Self> {
        let registry = AdapterRegistry::with_defaults(&settings);
        Self::with_registry(settings, registry)
    }

    /// A runner over a caller-supplied adapter table.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError::Settings`] if the execution durations are invalid.
    pub fn with_registry(settings: Settings, registry: AdapterRegistry) -> ReportResult<Self> {
        let executor = QueryExecutor::new(Arc::new(registry), settings.execution_policy()?);
        let renderer = ChartRenderer::from_settings(&settings.charts);
        let max_concurrent_queries = settings.execution.max_concurrent_queries.max(1);
        let output_dir = settings.charts.output_dir();
        Ok(Self {
            settings,
            executor,
            renderer,
            max_concurrent_queries,
            output_dir,
        })
    }

    /// Override where chart images are written.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    pub fn renderer(&self) -> &ChartRenderer {
        &self.renderer
    }

    /// Run `definition`, resolving relative paths against `base_dir`.
    ///
    /// Queries run with at most `execution.max_concurrent_queries` in flight
    /// and are collected in declaration order. Chart failures are recorded
    /// in [`ReportOutput::chart_failures`] and never fail the run.
    ///
    /// # Errors
    ///
    /// * [`ReportError::InvalidDefinition`] / [`ReportError::Io`] - the
    ///   definition cannot be resolved
    /// * [`ReportError::Settings`] - an item names an unknown system
    /// * [`ReportError::Engine`] - the first query that failed after retries
    /// * [`ReportError::Cancelled`] - `cancel` fired; no chart files remain
    #[tracing::instrument(name = "report.run", skip_all, fields(report = %definition.name))]
    pub async fn run(
        &self,
        definition: &ReportDefinition,
        base_dir: &Path,
        cancel: &CancellationToken,
    ) -> ReportResult<ReportOutput> {
        let report = definition.resolve(base_dir)?;

        // Every system is looked up before any query runs.
        let jobs = report
            .data
            .iter()
            .map(|item| &item.query)
            .chain(report.charts.iter().map(|item| &item.query))
            .map(|query| self.job(query))
            .collect::<ReportResult<Vec<_>>>()?;

        info!(queries = jobs.len(), charts = report.charts.len(), "running report");

        let outcomes: Vec<QueryOutcome> = stream::iter(jobs)
            .map(|(config, query)| self.executor.run(config, query, cancel))
            .buffered(self.max_concurrent_queries)
            .try_collect()
            .await
            .map_err(|err| match err {
                EngineError::Cancelled { .. } => ReportError::Cancelled,
                other => ReportError::Engine(other),
            })?;

        let mut warnings = Vec::new();
        let mut outcomes = outcomes.into_iter();

        let data: Vec<DataOutput> = report
            .data
            .iter()
            .zip(outcomes.by_ref())
            .map(|(item, outcome)| {
                warnings.extend(outcome.warnings);
                DataOutput {
                    name: item.name.clone(),
                    system: item.query.system.clone(),
                    result: outcome.result,
                }
            })
            .collect();

        let mut pending = Vec::with_capacity(report.charts.len());
        for (index, (item, outcome)) in report.charts.iter().zip(outcomes).enumerate() {
            warnings.extend(outcome.warnings);
            let records = prepare(&outcome.result);
            let descriptor = ChartDescriptor::new(item.title.clone(), item.cid.clone(), &item.spec, records);
            let output = self.output_dir.join(format!("chart_{index}_{}.png", Uuid::new_v4()));
            pending.push((index, descriptor, output));
        }

        let rendered = join_all(pending.iter().zip(&report.charts).map(|((_, descriptor, output), item)| {
            self.renderer.render(&item.spec, &descriptor.records, output, cancel)
        }))
        .await;

        if cancel.is_cancelled() {
            for path in rendered.iter().filter_map(|r| r.as_ref().ok()) {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path = %path.display(), error = %e, "failed to remove chart after cancellation");
                }
            }
            return Err(ReportError::Cancelled);
        }

        let mut charts = Vec::new();
        let mut chart_failures = Vec::new();
        for ((index, mut descriptor, _), outcome) in pending.into_iter().zip(rendered) {
            match outcome {
                Ok(path) => {
                    descriptor.path = Some(path);
                    charts.push(descriptor);
                }
                Err(err) => {
                    warn!(index, cid = %descriptor.cid, error = %err, "chart skipped");
                    chart_failures.push(ChartFailure {
                        index,
                        cid: descriptor.cid,
                        title: descriptor.title,
                        error: err.to_string(),
                    });
                }
            }
        }

        info!(
            data = report.data.len(),
            charts = charts.len(),
            chart_failures = chart_failures.len(),
            warnings = warnings.len(),
            "report completed"
        );

        Ok(ReportOutput {
            name: report.name,
            data,
            charts,
            chart_failures,
            warnings,
        })
    }

    fn job<'a>(&'a self, query: &'a ResolvedQuery) -> ReportResult<(&'a SystemConfig, &'a str)> {
        Ok((self.settings.system(&query.system)?, query.query.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettingsError;
    use crate::report::definition::{ChartItem, DataItem};

    fn settings(dir: &Path) -> Settings {
        let path = dir.join("orders.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE sales (region TEXT, total REAL);
             INSERT INTO sales VALUES ('north', 10.5), ('south', 4);",
        )
        .unwrap();

        let mut settings = Settings::default();
        let mut system = SystemConfig::new("orders", "sqlite");
        system.path = Some(path.display().to_string());
        settings.systems.insert("orders".into(), system);
        settings.charts.output_dir = Some(dir.join("charts").display().to_string());
        settings
    }

    fn definition() -> ReportDefinition {
        ReportDefinition {
            name: "Sales".into(),
            default_system: Some("orders".into()),
            data: vec![DataItem {
                name: Some("totals".into()),
                query: Some("SELECT region, total FROM sales ORDER BY region".into()),
                ..DataItem::default()
            }],
            charts: vec![
                ChartItem {
                    cid: Some("revenue".into()),
                    query: Some("SELECT region, total FROM sales ORDER BY region".into()),
                    spec: Some(serde_json::json!({
                        "mark": "bar",
                        "encoding": {"x": {"field": "region"}, "y": {"field": "total"}}
                    })),
                    ..ChartItem::default()
                },
                ChartItem {
                    query: Some("SELECT 1 AS n".into()),
                    spec: Some(serde_json::json!("not a chart")),
                    ..ChartItem::default()
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_run_collects_data_and_isolates_chart_failures() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ReportRunner::new(settings(dir.path())).unwrap();

        let output = runner
            .run(&definition(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.data.len(), 1);
        assert_eq!(output.data[0].result.columns(), ["region", "total"]);
        assert_eq!(output.data[0].result.row_count(), 2);

        assert_eq!(output.charts.len(), 1);
        let path = output.charts[0].path.as_ref().unwrap();
        assert!(path.exists());
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("chart_0_"));

        assert_eq!(output.chart_failures.len(), 1);
        assert_eq!(output.chart_failures[0].index, 1);
        assert_eq!(output.chart_failures[0].cid, "chart_1");
    }

    #[tokio::test]
    async fn test_unknown_system_fails_before_queries() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ReportRunner::new(settings(dir.path())).unwrap();
        let mut definition = definition();
        definition.data[0].system = Some("missing".into());

        let err = runner
            .run(&definition, dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ReportError::Settings(SettingsError::ConfigNotFound(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_no_charts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ReportRunner::new(settings(dir.path())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner.run(&definition(), dir.path(), &cancel).await.unwrap_err();
        assert!(matches!(err, ReportError::Cancelled));
        assert!(!dir.path().join("charts").exists());
    }
}
