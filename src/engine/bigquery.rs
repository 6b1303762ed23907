//! BigQuery adapter over the `jobs.query` REST API.
//!
//! ```text
//!   POST /projects/{p}/queries ──► jobComplete? ──no──► GET /queries/{job} (poll)
//!                                       │ yes
//!                                       ▼
//!                                 rows + pageToken ──► GET /queries/{job}?pageToken
//! ```
//!
//! Every cell arrives as `{"v": ..}` with scalars encoded as JSON strings;
//! the response schema says how to read them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::http::{client, send_json};
use super::temporal::epoch_seconds_to_rfc3339;
use super::{ensure_query, require, Adapter, EngineError, EngineKind, EngineResult};
use super::{FieldDescriptor, NativeValue, RawEngineResult};
use crate::config::SystemConfig;
use crate::tabular::ColumnType;

const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";
const DEFAULT_LOCATION: &str = "US";
/// Server-side wait per `getQueryResults` call.
const LONG_POLL_MS: u64 = 10_000;
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Map a BigQuery schema type to a column type.
pub fn classify_type(type_name: &str) -> ColumnType {
    match type_name.trim().to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" | "FLOAT" | "FLOAT64" | "NUMERIC" | "BIGNUMERIC" => ColumnType::Float,
        _ => ColumnType::String,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BigQueryAdapter;

#[async_trait]
impl Adapter for BigQueryAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::BigQuery
    }

    #[tracing::instrument(name = "bigquery.execute", skip_all, fields(system = %config.name))]
    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let query = ensure_query(config, query)?;
        let session = Session {
            system: &config.name,
            project: require(config, "project_id")?,
            token: require(config, "token")?,
            location: config.param("location").unwrap_or(DEFAULT_LOCATION),
            endpoint: config
                .param("endpoint")
                .unwrap_or(DEFAULT_ENDPOINT)
                .trim_end_matches('/'),
            http: client(&config.name)?,
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::cancelled(&config.name)),
            response = session.run(query) => response?,
        };

        let mut raw = decode_response(response);
        raw.infer_missing_kinds(&config.name);
        Ok(raw)
    }
}

struct Session<'a> {
    system: &'a str,
    project: &'a str,
    token: &'a str,
    location: &'a str,
    endpoint: &'a str,
    http: Client,
}

impl Session<'_> {
    /// Submit the query, wait for the job and gather every page.
    async fn run(&self, query: &str) -> EngineResult<QueryResponse> {
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project);
        let body = json!({
            "query": query,
            "useLegacySql": false,
            "location": self.location,
            "timeoutMs": LONG_POLL_MS,
        });
        let (_, mut response): (_, QueryResponse) =
            send_json(self.system, self.http.post(url).bearer_auth(self.token).json(&body)).await?;
        info!(project = self.project, location = self.location, "query submitted");

        let job_id = response.job_reference.as_ref().map(|job| job.job_id.clone());

        while !response.job_complete {
            let job_id = self.job_id(job_id.as_deref())?;
            tokio::time::sleep(POLL_INTERVAL).await;
            debug!(job_id, "job still running");
            response = self.results(job_id, None).await?;
        }

        while let Some(page_token) = response.page_token.take() {
            let job_id = self.job_id(job_id.as_deref())?;
            let mut page = self.results(job_id, Some(&page_token)).await?;
            debug!(job_id, rows = page.rows.len(), "fetched result page");
            response.rows.append(&mut page.rows);
            response.page_token = page.page_token;
        }

        Ok(response)
    }

    async fn results(&self, job_id: &str, page_token: Option<&str>) -> EngineResult<QueryResponse> {
        let url = format!("{}/projects/{}/queries/{}", self.endpoint, self.project, job_id);
        let timeout = LONG_POLL_MS.to_string();
        let mut params = vec![("location", self.location), ("timeoutMs", timeout.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let request = self.http.get(url).bearer_auth(self.token).query(&params);
        let (_, response) = send_json(self.system, request).await?;
        Ok(response)
    }

    fn job_id<'j>(&self, job_id: Option<&'j str>) -> EngineResult<&'j str> {
        job_id.ok_or_else(|| EngineError::query(self.system, "response carried no job reference"))
    }
}

// ============================================================================
// Response shapes
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<TableField>,
}

impl TableField {
    fn is_repeated(&self) -> bool {
        self.mode
            .as_deref()
            .is_some_and(|mode| mode.eq_ignore_ascii_case("REPEATED"))
    }

    fn is_record(&self) -> bool {
        matches!(
            self.field_type.to_ascii_uppercase().as_str(),
            "RECORD" | "STRUCT"
        )
    }

    fn column_type(&self) -> ColumnType {
        if self.is_repeated() {
            ColumnType::String
        } else {
            classify_type(&self.field_type)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_response(response: QueryResponse) -> RawEngineResult {
    let QueryResponse { schema, rows, .. } = response;

    let Some(schema) = schema else {
        // No schema: positional names, every field inferred.
        let width = rows.first().map_or(0, |row| row.f.len());
        let fields = (0..width)
            .map(|i| FieldDescriptor::untyped(format!("f{i}_")))
            .collect();
        let rows = rows
            .into_iter()
            .map(|row| row.f.into_iter().map(|c| NativeValue::from_json(c.v)).collect())
            .collect();
        return RawEngineResult::new(fields, rows);
    };

    let fields = schema
        .fields
        .iter()
        .map(|f| FieldDescriptor::typed(&f.name, &f.field_type, f.column_type()))
        .collect();

    let rows = rows
        .into_iter()
        .map(|row| {
            row.f
                .into_iter()
                .enumerate()
                .map(|(i, cell)| match schema.fields.get(i) {
                    Some(field) => decode_cell(field, cell.v),
                    None => NativeValue::from_json(cell.v),
                })
                .collect()
        })
        .collect();

    RawEngineResult::new(fields, rows)
}

fn decode_cell(field: &TableField, value: Value) -> NativeValue {
    if value.is_null() {
        return NativeValue::Null;
    }
    if field.is_repeated() || field.is_record() {
        return NativeValue::Json(plain_json(field, value));
    }

    let Value::String(text) = value else {
        return NativeValue::from_json(value);
    };

    match field.field_type.to_ascii_uppercase().as_str() {
        "INTEGER" | "INT64" => text
            .parse()
            .map(NativeValue::Int)
            .unwrap_or(NativeValue::Decimal(text)),
        "FLOAT" | "FLOAT64" => match text.parse() {
            Ok(f) => NativeValue::Float(f),
            Err(_) => NativeValue::Text(text),
        },
        "NUMERIC" | "BIGNUMERIC" => NativeValue::Decimal(text),
        "BOOLEAN" | "BOOL" => NativeValue::Bool(text.eq_ignore_ascii_case("true")),
        "TIMESTAMP" => NativeValue::Text(epoch_seconds_to_rfc3339(&text).unwrap_or(text)),
        "JSON" => match serde_json::from_str(&text) {
            Ok(parsed) => NativeValue::Json(parsed),
            Err(_) => NativeValue::Text(text),
        },
        _ => NativeValue::Text(text),
    }
}

/// Strip the `{"f": [{"v": ..}]}` wrapping from nested values.
///
/// Records become objects keyed by sub-field name; repeated fields become
/// arrays. Leaf scalars keep BigQuery's string encoding.
fn plain_json(field: &TableField, value: Value) -> Value {
    if field.is_repeated() {
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| record_json(field, cell_value(item)))
                    .collect(),
            ),
            other => other,
        };
    }
    record_json(field, value)
}

fn record_json(field: &TableField, value: Value) -> Value {
    if !field.is_record() {
        return value;
    }
    match value {
        Value::Object(mut object) => match object.remove("f") {
            Some(Value::Array(cells)) => {
                let mut record = Map::new();
                for (sub_field, cell) in field.fields.iter().zip(cells) {
                    record.insert(sub_field.name.clone(), plain_json(sub_field, cell_value(cell)));
                }
                Value::Object(record)
            }
            _ => Value::Object(object),
        },
        other => other,
    }
}

fn cell_value(cell: Value) -> Value {
    match cell {
        Value::Object(mut object) => object.remove("v").unwrap_or(Value::Null),
        other => other,
    }
}
