//! Wire format spoken with the database worker.
//!
//! Newline-delimited JSON. Each request line carries an `id`; the worker
//! answers with exactly one reply line echoing it:
//!
//! ```text
//! → {"id":"…","method":"query.execute","params":{"driver":"duckdb","connection_string":"…","sql":"…"}}
//! ← {"id":"…","success":true,"result":{"columns":[…],"rows":[…],"row_count":1}}
//! ← {"id":"…","success":false,"error":{"code":"QUERY_FAILED","message":"…"}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const EXECUTE_QUERY: &str = "query.execute";

// ============================================================================
// Framing
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Request<'a, P> {
    pub id: &'a str,
    pub method: &'a str,
    pub params: P,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Reply {
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Fault>,
}

impl Reply {
    /// The payload of a successful reply, or the worker's fault.
    ///
    /// A failed reply without an `error` object is reported as
    /// [`FaultCode::Other`].
    pub fn into_result(self) -> Result<Value, Fault> {
        if self.success {
            return Ok(self.result.unwrap_or(Value::Null));
        }
        Err(self.error.unwrap_or_else(|| Fault {
            code: FaultCode::Other("UNKNOWN".to_string()),
            message: "worker reported failure without details".to_string(),
        }))
    }
}

/// The `error` object of a failed reply.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Fault {
    pub code: FaultCode,
    pub message: String,
}

/// Error codes the worker reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultCode {
    DriverNotFound,
    ConnectionFailed,
    QueryFailed,
    InvalidRequest,
    MethodNotFound,
    Other(String),
}

impl FaultCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::DriverNotFound => "DRIVER_NOT_FOUND",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::QueryFailed => "QUERY_FAILED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::MethodNotFound => "METHOD_NOT_FOUND",
            Self::Other(code) => code,
        }
    }

    /// Codes raised before the database saw the statement.
    pub fn before_query(&self) -> bool {
        matches!(self, Self::DriverNotFound | Self::ConnectionFailed)
    }
}

impl<'de> Deserialize<'de> for FaultCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(match code.as_str() {
            "DRIVER_NOT_FOUND" => Self::DriverNotFound,
            "CONNECTION_FAILED" => Self::ConnectionFailed,
            "QUERY_FAILED" => Self::QueryFailed,
            "INVALID_REQUEST" => Self::InvalidRequest,
            "METHOD_NOT_FOUND" => Self::MethodNotFound,
            _ => Self::Other(code),
        })
    }
}

impl std::fmt::Display for FaultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// query.execute
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteQueryParams<'a> {
    /// `mssql` or `duckdb`.
    pub driver: &'a str,
    pub connection_string: &'a str,
    pub sql: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResultColumn {
    pub name: String,
    /// Engine type name; empty when the driver reports none.
    #[serde(default)]
    pub data_type: String,
}

/// The worker's `row_count` is ignored; `rows` is authoritative.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteQueryResponse {
    pub columns: Vec<QueryResultColumn>,
    /// Positional, aligned with `columns`.
    #[serde(default)]
    pub rows: Vec<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line_shape() {
        let request = Request {
            id: "r-1",
            method: EXECUTE_QUERY,
            params: ExecuteQueryParams {
                driver: "duckdb",
                connection_string: "./sales.duckdb",
                sql: "SELECT 1",
            },
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "id": "r-1",
                "method": "query.execute",
                "params": {
                    "driver": "duckdb",
                    "connection_string": "./sales.duckdb",
                    "sql": "SELECT 1"
                }
            })
        );
    }

    #[test]
    fn test_failed_reply_carries_fault() {
        let reply: Reply = serde_json::from_str(
            r#"{"id":"r-2","success":false,"error":{"code":"CONNECTION_FAILED","message":"refused"}}"#,
        )
        .unwrap();
        let fault = reply.into_result().unwrap_err();
        assert_eq!(fault.code, FaultCode::ConnectionFailed);
        assert!(fault.code.before_query());
        assert_eq!(fault.message, "refused");
    }

    #[test]
    fn test_unknown_code_is_kept() {
        let fault: Fault =
            serde_json::from_value(json!({"code": "DISK_FULL", "message": "no space"})).unwrap();
        assert_eq!(fault.code, FaultCode::Other("DISK_FULL".into()));
        assert_eq!(fault.code.to_string(), "DISK_FULL");
        assert!(!fault.code.before_query());
    }

    #[test]
    fn test_failure_without_error_object() {
        let reply: Reply = serde_json::from_str(r#"{"id":"r-3","success":false}"#).unwrap();
        assert_eq!(reply.into_result().unwrap_err().code.as_str(), "UNKNOWN");
    }

    #[test]
    fn test_execute_response_defaults() {
        let response: ExecuteQueryResponse = serde_json::from_value(json!({
            "columns": [{"name": "n", "data_type": "INT"}, {"name": "d"}],
            "rows": [[1, "2024-01-01T00:00:00Z"]]
        }))
        .unwrap();
        assert_eq!(response.columns[1].data_type, "");
        assert_eq!(response.rows[0][0], json!(1));
    }

    #[test]
    fn test_reported_row_count_is_not_trusted() {
        let response: ExecuteQueryResponse = serde_json::from_value(json!({
            "columns": [{"name": "n"}],
            "rows": [[1], [2]],
            "row_count": 7
        }))
        .unwrap();
        assert_eq!(response.rows.len(), 2);
    }
}
