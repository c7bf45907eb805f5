//! Concurrent execution of many pipeline runs.

use super::orchestrator::PipelineOrchestrator;
use crate::errors::{ContentflowError, ErrorKind, Result};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::observability::SpanTimer;
use crate::stages::{PipelineContext, PipelineRequest, StageName};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Metric operation recorded once per batch.
pub const BATCH_OPERATION: &str = "batch_creation";

/// Outcome of one batch item.
#[derive(Debug)]
pub enum BatchItemOutcome {
    /// The pipeline completed.
    Completed(Box<PipelineContext>),
    /// The pipeline failed; other items are unaffected.
    Failed {
        /// The failing stage, absent for rejected requests and crashed tasks.
        stage: Option<StageName>,
        /// Error classification.
        kind: ErrorKind,
        /// Error message.
        message: String,
    },
}

impl BatchItemOutcome {
    fn from_error(err: &ContentflowError) -> Self {
        Self::Failed {
            stage: err.failed_stage(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Whether the item completed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The completed context, if any.
    #[must_use]
    pub fn context(&self) -> Option<&PipelineContext> {
        match self {
            Self::Completed(ctx) => Some(&**ctx),
            Self::Failed { .. } => None,
        }
    }

    /// The failing stage, if the item failed inside one.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageName> {
        match self {
            Self::Completed(_) => None,
            Self::Failed { stage, .. } => *stage,
        }
    }
}

/// Aggregated result of a batch.
///
/// `results` is index-aligned with the submitted requests.
#[derive(Debug)]
pub struct BatchResult {
    /// Batch identifier.
    pub batch_id: Uuid,
    /// Per-item outcomes, in input order.
    pub results: Vec<BatchItemOutcome>,
    /// Number of items.
    pub total: usize,
    /// Items that completed.
    pub successful: usize,
    /// Items that failed.
    pub failed: usize,
    /// Wall-clock time from first dispatch to last completion.
    pub duration: Duration,
    /// When dispatch started.
    pub started_at: DateTime<Utc>,
    /// When the last item finished.
    pub completed_at: DateTime<Utc>,
}

impl BatchResult {
    /// Whether every item completed.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Failed items with their input index.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &BatchItemOutcome)> {
        self.results
            .iter()
            .enumerate()
            .filter(|(_, outcome)| !outcome.is_success())
    }
}

#[derive(Serialize)]
struct BatchMetadata {
    batch_id: Uuid,
    total: usize,
    successful: usize,
    failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_batch_size: Option<usize>,
}

/// Runs a pipeline over many requests at once.
///
/// Items share one orchestrator and therefore one admission budget. A failing
/// item never affects the others.
#[derive(Clone)]
pub struct BatchOrchestrator {
    pipeline: Arc<PipelineOrchestrator>,
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl BatchOrchestrator {
    /// Creates a batch orchestrator reporting to the pipeline's event sink.
    #[must_use]
    pub fn new(pipeline: Arc<PipelineOrchestrator>) -> Self {
        let events = Arc::clone(pipeline.events());
        Self { pipeline, events }
    }

    /// Sets the event sink for batch events.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Creates a batch orchestrator that emits no batch events.
    #[must_use]
    pub fn silent(pipeline: Arc<PipelineOrchestrator>) -> Self {
        Self {
            pipeline,
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Returns the pipeline orchestrator.
    #[must_use]
    pub fn pipeline(&self) -> &Arc<PipelineOrchestrator> {
        &self.pipeline
    }

    /// Runs every request and aggregates the outcomes.
    ///
    /// Batches larger than `max_batch_size` are rejected before any request
    /// is dispatched. Otherwise the batch always completes: item failures
    /// are reported in their slot of [`BatchResult::results`].
    pub async fn run_batch(&self, requests: Vec<PipelineRequest>) -> Result<BatchResult> {
        let batch_id = Uuid::now_v7();
        let max = self.pipeline.monitor().budget().max_batch_size;

        if requests.len() > max {
            warn!(%batch_id, size = requests.len(), max, "Rejecting oversized batch");
            self.pipeline.metrics().record_with(
                BATCH_OPERATION,
                Duration::ZERO,
                false,
                &BatchMetadata {
                    batch_id,
                    total: requests.len(),
                    successful: 0,
                    failed: 0,
                    max_batch_size: Some(max),
                },
            );
            return Err(ContentflowError::BatchSizeExceeded {
                size: requests.len(),
                max,
            });
        }

        let span = info_span!("batch", %batch_id, size = requests.len());
        self.dispatch(batch_id, requests).instrument(span).await
    }

    async fn dispatch(&self, batch_id: Uuid, requests: Vec<PipelineRequest>) -> Result<BatchResult> {
        let total = requests.len();
        let started_at = Utc::now();
        let timer = SpanTimer::start(BATCH_OPERATION);

        self.events
            .emit(&PipelineEvent::BatchStarted {
                batch_id,
                size: total,
            })
            .await;
        info!(total, "Batch started");

        let handles: Vec<_> = requests
            .into_iter()
            .map(|request| {
                let pipeline = Arc::clone(&self.pipeline);
                tokio::spawn(async move { pipeline.run(request).await }.in_current_span())
            })
            .collect();

        let results: Vec<BatchItemOutcome> = join_all(handles)
            .await
            .into_iter()
            .enumerate()
            .map(|(index, joined)| match joined {
                Ok(Ok(context)) => BatchItemOutcome::Completed(Box::new(context)),
                Ok(Err(err)) => BatchItemOutcome::from_error(&err),
                Err(join_err) => {
                    error!(index, error = %join_err, "Batch item task failed");
                    BatchItemOutcome::Failed {
                        stage: None,
                        kind: ErrorKind::Internal,
                        message: format!("batch item task failed: {join_err}"),
                    }
                }
            })
            .collect();

        let duration = timer.finish();
        let completed_at = Utc::now();
        let successful = results.iter().filter(|r| r.is_success()).count();
        let failed = total - successful;

        self.pipeline.metrics().record_with(
            BATCH_OPERATION,
            duration,
            true,
            &BatchMetadata {
                batch_id,
                total,
                successful,
                failed,
                max_batch_size: None,
            },
        );
        self.events
            .emit(&PipelineEvent::BatchCompleted {
                batch_id,
                total,
                successful,
                failed,
                duration_ms: duration.as_secs_f64() * 1000.0,
            })
            .await;
        info!(
            total,
            successful,
            failed,
            duration_ms = duration.as_millis() as u64,
            "Batch completed"
        );

        Ok(BatchResult {
            batch_id,
            results,
            total,
            successful,
            failed,
            duration,
            started_at,
            completed_at,
        })
    }
}
