//! Timeout, retry and cancellation around adapter calls.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Adapter, AdapterRegistry, EngineError, EngineResult, RawEngineResult};
use crate::config::SystemConfig;
use crate::tabular::{normalize, UniversalTabularResult, Warning};

/// Bounded exponential backoff for connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Never below 1.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before the attempt that follows attempt `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Limits applied to every adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionPolicy {
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

/// A normalized query result with its execution record.
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub result: UniversalTabularResult,
    pub warnings: Vec<Warning>,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Routes queries to adapters under an [`ExecutionPolicy`].
#[derive(Clone)]
pub struct QueryExecutor {
    registry: Arc<AdapterRegistry>,
    policy: ExecutionPolicy,
}

impl QueryExecutor {
    pub fn new(registry: Arc<AdapterRegistry>, policy: ExecutionPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Execute and normalize one query.
    ///
    /// # Errors
    ///
    /// Routing errors, then whatever the final attempt returned. Only
    /// [`EngineError::Connection`] is retried.
    pub async fn run(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<QueryOutcome> {
        let started = Instant::now();
        let (raw, attempts) = self.execute_raw(config, query, cancel).await?;
        let normalized = normalize(&config.name, query, raw);

        let elapsed = started.elapsed();
        info!(
            system = %config.name,
            rows = normalized.result.row_count(),
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "query completed"
        );

        Ok(QueryOutcome {
            result: normalized.result,
            warnings: normalized.warnings,
            attempts,
            elapsed,
        })
    }

    /// Execute one query and return the raw result with the attempt count.
    pub async fn execute_raw(
        &self,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<(RawEngineResult, u32)> {
        let adapter = self.registry.route(config)?;
        debug!(system = %config.name, engine = %adapter.kind(), %query, "executing query");

        let retry = self.policy.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(adapter.as_ref(), config, query, cancel).await {
                Ok(raw) => return Ok((raw, attempt)),
                Err(err) if err.is_retriable() && attempt < max_attempts => {
                    let delay = retry.backoff_for(attempt);
                    warn!(
                        system = %config.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after connection failure"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(EngineError::cancelled(&config.name)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(
        &self,
        adapter: &dyn Adapter,
        config: &SystemConfig,
        query: &str,
        cancel: &CancellationToken,
    ) -> EngineResult<RawEngineResult> {
        if cancel.is_cancelled() {
            return Err(EngineError::cancelled(&config.name));
        }

        let timeout = self.policy.timeout;
        // Dropping the adapter future releases its connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::cancelled(&config.name)),
            outcome = tokio::time::timeout(timeout, adapter.execute(config, query, cancel)) => {
                match outcome {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout {
                        system: config.name.clone(),
                        after: timeout,
                    }),
                }
            }
        }
    }
}
