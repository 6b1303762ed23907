//! Shared request plumbing for the REST engines.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::{EngineError, EngineResult};

/// A fresh HTTP client for one query call; dropping it closes its connections.
pub(crate) fn client(system: &str) -> EngineResult<Client> {
    Client::builder()
        .user_agent(concat!("tabula/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| EngineError::connection(system, e))
}

/// Send `request` and decode a 2xx JSON body, returning the status with it.
///
/// # Errors
///
/// Transport failures and authentication or availability statuses are
/// [`EngineError::Connection`]; every other non-2xx status and an undecodable
/// body are [`EngineError::Query`].
pub(crate) async fn send_json<T: DeserializeOwned>(
    system: &str,
    request: RequestBuilder,
) -> EngineResult<(StatusCode, T)> {
    let response = request
        .send()
        .await
        .map_err(|e| EngineError::connection(system, e))?;
    let status = response.status();

    if status.is_success() {
        let body = response
            .json::<T>()
            .await
            .map_err(|e| EngineError::query(system, format!("malformed response: {e}")))?;
        return Ok((status, body));
    }

    let body = response.text().await.unwrap_or_default();
    debug!(%status, body = %body, "engine returned an error status");
    let message = error_message(&body).unwrap_or_else(|| format!("HTTP {status}"));
    Err(classify_status(system, status, message))
}

pub(crate) fn classify_status(system: &str, status: StatusCode, message: String) -> EngineError {
    let unavailable = matches!(
        status,
        StatusCode::UNAUTHORIZED
            | StatusCode::FORBIDDEN
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
    ) || status.is_server_error();

    if unavailable {
        EngineError::connection(system, message)
    } else {
        EngineError::query(system, message)
    }
}

/// Pull a readable message out of a JSON error body.
///
/// Understands `{"error": {"message": ..}}` and `{"message": ..}`.
pub(crate) fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/error/message")
        .or_else(|| value.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
}
