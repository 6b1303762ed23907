//! Snowflake adapter over the SQL API v2.
//!
//! A statement that outlives the synchronous window comes back as `202` with
//! a handle; the handle is polled until `200`. Large results are split into
//! partitions, each fetched separately. Values arrive as strings (or null)
//! and are decoded by the `rowType` metadata.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::http::{client, send_json};
use super::temporal::{
    epoch_days_to_date, epoch_seconds_to_naive, epoch_seconds_to_rfc3339,
    epoch_seconds_with_offset, seconds_to_time,
};
use super::{ensure_query, require, Adapter, EngineError, EngineKind, EngineResult};
use super::{FieldDescriptor, NativeValue, RawEngineResult};
use crate::config::SystemConfig;
use crate::tabular::ColumnType;

const DEFAULT_TOKEN_TYPE: &str = "OAUTH";
const TOKEN_TYPE_HEADER: &str = "X-Snowflake-Authorization-Token-Type";

/// Map a Snowflake `rowType` type to a column type.
pub fn classify_type(type_name: &str) -> ColumnType {
    match type_name.trim().to_ascii_lowercase().as_str() {
        "fixed" | "real" => ColumnType::Float,
        _ => ColumnType::String,
    }
}

#[derive(Debug, Clone)]
pub struct SnowflakeAdapter {
    poll_interval: Duration,
}

impl Default for SnowflakeAdapter {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl SnowflakeAdapter {
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }
}

#[async_trait]
impl Adapter for SnowflakeAdapter {
    fn kind(&self) -> EngineKind {
        EngineKind::Snowflake
    }

    #[tracing::instrument(name = "snowflake.execute", skip_all, fields(system = %config.name))]
    async fn execute(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        let query = ensure_query(config, query)?;
        let account = require(config, "account")?;
        let endpoint = match config.param("endpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{account}.snowflakecomputing.com"),
        };

        let session = Session {
            system: &config.name,
            token: require(config, "token")?,
            token_type: config.param("token_type").unwrap_or(DEFAULT_TOKEN_TYPE),
            endpoint,
            http: client(&config.name)?,
            poll_interval: self.poll_interval,
        };

        let statement = Statement {
            statement: query,
            warehouse: config.param("warehouse"),
            database: config.param("database"),
            schema: config.param("schema"),
            role: config.param("role"),
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::cancelled(&config.name)),
            response = session.run(&statement) => response?,
        };

        let mut raw = decode_response(response);
        raw.infer_missing_kinds(&config.name);
        Ok(raw)
    }
}

struct Session<'a> {
    system: &'a str,
    token: &'a str,
    token_type: &'a str,
    endpoint: String,
    http: Client,
    poll_interval: Duration,
}

impl Session<'_> {
    async fn run(&self, statement: &Statement<'_>) -> EngineResult<StatementResponse> {
        let url = format!("{}/api/v2/statements", self.endpoint);
        let (mut status, mut response) = self.send(self.http.post(url).json(statement)).await?;
        info!(endpoint = %self.endpoint, "statement submitted");

        while status == StatusCode::ACCEPTED {
            let handle = self.handle(&response)?.to_string();
            tokio::time::sleep(self.poll_interval).await;
            debug!(handle, "statement still running");
            (status, response) = self.send(self.http.get(self.statement_url(&handle))).await?;
        }

        let partitions = response
            .result_set_meta_data
            .as_ref()
            .map_or(0, |meta| meta.partition_info.len());
        if partitions > 1 {
            let handle = self.handle(&response)?.to_string();
            for partition in 1..partitions {
                let request = self
                    .http
                    .get(self.statement_url(&handle))
                    .query(&[("partition", partition)]);
                let (_, page) = self.send(request).await?;
                debug!(handle, partition, rows = page.data.len(), "fetched partition");
                response.data.extend(page.data);
            }
        }

        Ok(response)
    }

    async fn send(&self, request: RequestBuilder) -> EngineResult<(StatusCode, StatementResponse)> {
        let request = request
            .bearer_auth(self.token)
            .header(TOKEN_TYPE_HEADER, self.token_type)
            .header(reqwest::header::ACCEPT, "application/json");
        send_json(self.system, request).await
    }

    fn statement_url(&self, handle: &str) -> String {
        format!("{}/api/v2/statements/{}", self.endpoint, handle)
    }

    fn handle<'r>(&self, response: &'r StatementResponse) -> EngineResult<&'r str> {
        response
            .statement_handle
            .as_deref()
            .ok_or_else(|| EngineError::query(self.system, "response carried no statement handle"))
    }
}

// ============================================================================
// Request and response shapes
// ============================================================================

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    warehouse: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    statement_handle: Option<String>,
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Vec<Vec<Option<String>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    column_type: String,
    #[serde(default)]
    scale: Option<i64>,
}

// ============================================================================
// Decoding
// ============================================================================

fn decode_response(response: StatementResponse) -> RawEngineResult {
    let row_type = response
        .result_set_meta_data
        .map(|meta| meta.row_type)
        .unwrap_or_default();

    let fields = row_type
        .iter()
        .map(|column| {
            FieldDescriptor::typed(&column.name, &column.column_type, classify_type(&column.column_type))
        })
        .collect();

    let rows = response
        .data
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, cell)| match (row_type.get(i), cell) {
                    (_, None) => NativeValue::Null,
                    (Some(column), Some(text)) => decode_cell(column, text),
                    (None, Some(text)) => NativeValue::Text(text),
                })
                .collect()
        })
        .collect();

    RawEngineResult::new(fields, rows)
}

fn decode_cell(column: &RowType, text: String) -> NativeValue {
    let unwrapped = match column.column_type.to_ascii_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => {
            return text
                .parse()
                .map(NativeValue::Int)
                .unwrap_or(NativeValue::Decimal(text));
        }
        "fixed" => return NativeValue::Decimal(text),
        "real" => {
            return match text.parse() {
                Ok(f) => NativeValue::Float(f),
                Err(_) => NativeValue::Text(text),
            };
        }
        "boolean" => return NativeValue::Bool(matches!(text.as_str(), "true" | "TRUE" | "1")),
        "variant" | "object" | "array" => {
            return match serde_json::from_str(&text) {
                Ok(parsed) => NativeValue::Json(parsed),
                Err(_) => NativeValue::Text(text),
            };
        }
        "date" => epoch_days_to_date(&text),
        "time" => seconds_to_time(&text),
        "timestamp_ntz" => epoch_seconds_to_naive(&text),
        "timestamp_ltz" => epoch_seconds_to_rfc3339(&text),
        "timestamp_tz" => epoch_seconds_with_offset(&text),
        _ => None,
    };
    NativeValue::Text(unwrapped.unwrap_or(text))
}
