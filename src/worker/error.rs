use std::io;
use std::time::Duration;

use thiserror::Error;

use super::protocol::Fault;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("worker binary not found; set worker.path in tabula.toml")]
    NotFound,

    #[error("cannot start worker: {0}")]
    Spawn(#[source] io::Error),

    #[error("worker pipe broken: {0}")]
    Pipe(#[source] io::Error),

    #[error("cannot encode worker request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("malformed worker reply: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("worker did not answer within {0:?}")]
    Timeout(Duration),

    /// Stdout closed before the reply arrived.
    #[error("worker exited before replying")]
    Exited,

    #[error("worker cancelled")]
    Cancelled,

    #[error("{} ({})", .0.message, .0.code)]
    Fault(Fault),
}

impl WorkerError {
    /// Whether the failure happened before the database saw the query.
    pub fn is_connection_failure(&self) -> bool {
        match self {
            Self::NotFound | Self::Spawn(_) | Self::Pipe(_) | Self::Exited => true,
            Self::Fault(fault) => fault.code.before_query(),
            _ => false,
        }
    }
}
