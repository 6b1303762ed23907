use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{WorkerError, WorkerResult};
use super::protocol::{self, ExecuteQueryParams, ExecuteQueryResponse, Reply, Request};

/// A spawned worker, good for a handful of calls and then dropped.
///
/// The child is killed on drop, so holding a `WorkerClient` is the whole
/// lifetime of the process. Calls are sequential: each writes one request
/// line and reads until the reply with the same id.
///
/// ```ignore
/// let mut client = WorkerClient::spawn_with_timeout("./tabula-worker", timeout).await?;
/// let response = client
///     .execute_query("duckdb", "./sales.duckdb", "SELECT 1 AS n", &cancel)
///     .await;
/// client.shutdown().await;
/// ```
pub struct WorkerClient {
    child: Child,
    stdin: ChildStdin,
    replies: Lines<BufReader<ChildStdout>>,
    timeout: Duration,
}

impl WorkerClient {
    /// Start the worker at `path`; every call gets at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`WorkerError::Spawn`] if the binary cannot be started.
    pub async fn spawn_with_timeout(path: impl AsRef<Path>, timeout: Duration) -> WorkerResult<Self> {
        let path = path.as_ref();
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkerError::Spawn(std::io::Error::other("worker pipes not captured")));
        };
        debug!(path = %path.display(), pid = ?child.id(), "worker started");

        Ok(Self {
            child,
            stdin,
            replies: BufReader::new(stdout).lines(),
            timeout,
        })
    }

    /// Run `sql` through `driver`.
    pub async fn execute_query(
        &mut self,
        driver: &str,
        connection_string: &str,
        sql: &str,
        cancel: &CancellationToken,
    ) -> WorkerResult<ExecuteQueryResponse> {
        let params = ExecuteQueryParams {
            driver,
            connection_string,
            sql,
        };
        self.call(protocol::EXECUTE_QUERY, params, cancel).await
    }

    /// One request/reply exchange.
    ///
    /// # Errors
    ///
    /// * [`WorkerError::Timeout`] - no reply within the client's timeout
    /// * [`WorkerError::Cancelled`] - `cancel` fired first
    /// * [`WorkerError::Fault`] - the worker answered with an error
    pub async fn call<P, R>(&mut self, method: &str, params: P, cancel: &CancellationToken) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = Uuid::new_v4().to_string();
        let mut line = serde_json::to_string(&Request {
            id: &id,
            method,
            params,
        })
        .map_err(WorkerError::Encode)?;
        line.push('\n');

        let timeout = self.timeout;
        let exchange = async {
            self.stdin.write_all(line.as_bytes()).await.map_err(WorkerError::Pipe)?;
            self.stdin.flush().await.map_err(WorkerError::Pipe)?;
            self.await_reply(&id).await
        };

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
            outcome = tokio::time::timeout(timeout, exchange) => {
                outcome.map_err(|_| WorkerError::Timeout(timeout))??
            }
        };

        let value = reply.into_result().map_err(WorkerError::Fault)?;
        serde_json::from_value(value).map_err(WorkerError::Decode)
    }

    async fn await_reply(&mut self, id: &str) -> WorkerResult<Reply> {
        while let Some(line) = self.replies.next_line().await.map_err(WorkerError::Pipe)? {
            if line.trim().is_empty() {
                continue;
            }
            let reply: Reply = serde_json::from_str(&line).map_err(WorkerError::Decode)?;
            if reply.id == id {
                return Ok(reply);
            }
            warn!(id = %reply.id, "ignoring reply to another request");
        }
        Err(WorkerError::Exited)
    }

    /// Kill the worker and reap it.
    pub async fn shutdown(mut self) {
        if let Err(err) = self.child.kill().await {
            debug!(error = %err, "worker already gone");
        }
    }
}
