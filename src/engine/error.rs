//! Engine execution errors.

use std::fmt::Display;
use std::time::Duration;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors raised while routing or executing a query.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No adapter is registered for the engine tag.
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),

    /// A connection parameter the engine needs is absent.
    #[error("incomplete {engine} configuration for system '{system}': missing {parameter}")]
    IncompleteConfig {
        system: String,
        engine: String,
        parameter: &'static str,
    },

    /// The engine could not be reached or rejected the credentials.
    #[error("connection to '{system}' failed: {message}")]
    Connection { system: String, message: String },

    /// The engine rejected or failed on the submitted query.
    #[error("query on '{system}' failed: {message}")]
    Query { system: String, message: String },

    #[error("query on '{system}' timed out after {after:?}")]
    Timeout { system: String, after: Duration },

    #[error("query on '{system}' was cancelled")]
    Cancelled { system: String },
}

impl EngineError {
    pub fn connection(system: &str, message: impl Display) -> Self {
        Self::Connection {
            system: system.to_string(),
            message: message.to_string(),
        }
    }

    pub fn query(system: &str, message: impl Display) -> Self {
        Self::Query {
            system: system.to_string(),
            message: message.to_string(),
        }
    }

    pub fn cancelled(system: &str) -> Self {
        Self::Cancelled {
            system: system.to_string(),
        }
    }

    /// Only connection failures are worth another attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_errors_retry() {
        assert!(EngineError::connection("a", "refused").is_retriable());
        assert!(!EngineError::query("a", "syntax error").is_retriable());
        assert!(!EngineError::Timeout {
            system: "a".into(),
            after: Duration::from_secs(1)
        }
        .is_retriable());
        assert!(!EngineError::IncompleteConfig {
            system: "a".into(),
            engine: "postgres".into(),
            parameter: "host"
        }
        .is_retriable());
    }

    #[test]
    fn test_messages() {
        let err = EngineError::IncompleteConfig {
            system: "orders".into(),
            engine: "postgres".into(),
            parameter: "host",
        };
        assert_eq!(
            err.to_string(),
            "incomplete postgres configuration for system 'orders': missing host"
        );
    }
}
