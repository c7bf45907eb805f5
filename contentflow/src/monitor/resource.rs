//! Admission-controlled execution with timeout and retry.

use super::backoff::BackoffState;
use crate::config::ResourceBudget;
use crate::errors::{ContentflowError, Result, ValidationError};
use crate::metrics::MetricsCollector;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Per-call overrides for [`ResourceMonitor::execute_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Per-attempt deadline; the budget's stage timeout when `None`.
    pub timeout: Option<Duration>,
    /// Retries after the first attempt; the budget's value when `None`.
    pub max_retries: Option<u32>,
}

impl ExecuteOptions {
    /// Creates options that use the budget defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-attempt deadline.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

enum AttemptFailure {
    Timeout,
    Error(anyhow::Error),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "attempt timed out"),
            Self::Error(e) => write!(f, "{e:#}"),
        }
    }
}

/// Bounded-concurrency executor for external work.
///
/// Every call to [`execute`](Self::execute) holds one admission slot from the
/// moment it is admitted until it returns, across all of its attempts and
/// backoff sleeps. Callers beyond the budget wait for a slot.
#[derive(Debug)]
pub struct ResourceMonitor {
    semaphore: Semaphore,
    budget: ResourceBudget,
    metrics: Arc<MetricsCollector>,
}

impl ResourceMonitor {
    /// Creates a monitor with its own metrics collector.
    pub fn new(budget: ResourceBudget) -> Result<Self> {
        let metrics = Arc::new(MetricsCollector::with_thresholds(budget.monitoring));
        Self::with_metrics(budget, metrics)
    }

    /// Creates a monitor reporting into a shared metrics collector.
    pub fn with_metrics(budget: ResourceBudget, metrics: Arc<MetricsCollector>) -> Result<Self> {
        budget.validate()?;
        if budget.max_concurrent_workers > Semaphore::MAX_PERMITS {
            return Err(ContentflowError::Config(format!(
                "max_concurrent_workers must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }

        Ok(Self {
            semaphore: Semaphore::new(budget.max_concurrent_workers),
            budget,
            metrics,
        })
    }

    /// Returns the budget this monitor enforces.
    #[must_use]
    pub fn budget(&self) -> &ResourceBudget {
        &self.budget
    }

    /// Returns the metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Admission slots currently free.
    #[must_use]
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Admission slots currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.budget
            .max_concurrent_workers
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Runs `work` with the budget's default timeout and retries.
    pub async fn execute<T, F, Fut>(&self, operation: &str, work: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with(operation, ExecuteOptions::default(), work)
            .await
    }

    /// Runs `work` under an admission slot with timeout and retry.
    ///
    /// `work` is invoked once per attempt, so it must be safe to call again
    /// after a failure or a timeout. An attempt that exceeds the deadline is
    /// dropped, which cancels whatever it was awaiting. Errors that downcast
    /// to [`ValidationError`] end the call immediately.
    ///
    /// Exactly one metric is recorded per call.
    pub async fn execute_with<T, F, Fut>(
        &self,
        operation: &str,
        options: ExecuteOptions,
        mut work: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let timeout = options.timeout.unwrap_or_else(|| self.budget.stage_timeout());
        let max_retries = options.max_retries.unwrap_or(self.budget.max_retries);

        let queued_at = Instant::now();
        let _permit = self.semaphore.acquire().await.map_err(|_| {
            ContentflowError::Internal("resource monitor admission semaphore closed".to_string())
        })?;
        let queue_wait = queued_at.elapsed();

        let started = Instant::now();
        let mut backoff = BackoffState::new();
        let mut attempts: u32 = 0;
        let mut all_timed_out = true;

        let outcome = loop {
            attempts = attempts.saturating_add(1);

            let failure = match tokio::time::timeout(timeout, work()).await {
                Ok(Ok(value)) => break Ok(value),
                Ok(Err(err)) => match err.downcast_ref::<ValidationError>() {
                    Some(invalid) => break Err(ContentflowError::Validation(invalid.clone())),
                    None => AttemptFailure::Error(err),
                },
                Err(_elapsed) => AttemptFailure::Timeout,
            };
            all_timed_out &= matches!(failure, AttemptFailure::Timeout);

            if attempts > max_retries {
                break Err(give_up(
                    operation,
                    attempts,
                    timeout,
                    max_retries,
                    all_timed_out,
                    failure,
                ));
            }

            let delay = backoff.next_delay(&self.budget.backoff);
            debug!(
                operation,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Retrying after failure"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        };

        let duration = started.elapsed();
        let mut metadata = HashMap::from([
            ("attempts".to_string(), serde_json::json!(attempts)),
            ("max_retries".to_string(), serde_json::json!(max_retries)),
            ("timeout_ms".to_string(), serde_json::json!(timeout.as_millis() as u64)),
            ("queue_wait_ms".to_string(), serde_json::json!(queue_wait.as_millis() as u64)),
        ]);
        if let Err(ref e) = outcome {
            metadata.insert("error_kind".to_string(), serde_json::json!(e.kind()));
            warn!(operation, attempts, error = %e, "Monitored operation failed");
        }
        self.metrics
            .record(operation, duration, outcome.is_ok(), metadata);

        outcome
    }
}

/// `Timeout` only when every attempt hit the deadline; a mix of errors and
/// timeouts is reported as exhausted retries.
fn give_up(
    operation: &str,
    attempts: u32,
    timeout: Duration,
    max_retries: u32,
    all_timed_out: bool,
    failure: AttemptFailure,
) -> ContentflowError {
    match failure {
        AttemptFailure::Timeout if all_timed_out => ContentflowError::Timeout {
            operation: operation.to_string(),
            attempts,
            timeout_ms: timeout.as_millis() as u64,
        },
        AttemptFailure::Error(err) if max_retries == 0 => ContentflowError::Work {
            operation: operation.to_string(),
            message: format!("{err:#}"),
        },
        failure => ContentflowError::RetriesExhausted {
            operation: operation.to_string(),
            attempts,
            last_error: failure.to_string(),
        },
    }
}
