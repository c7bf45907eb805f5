//! Pipeline lifecycle events.
//!
//! Orchestrators report what they are doing through an [`EventSink`]. Events
//! are typed and serialize with a `type` tag such as `"stage.failed"`.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::errors::ErrorKind;
use crate::stages::StageName;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Something that happened during a pipeline or batch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A pipeline run passed validation and is about to run its stages.
    #[serde(rename = "pipeline.started")]
    PipelineStarted {
        /// Run identifier.
        run_id: Uuid,
        /// Requested content type.
        content_type: String,
        /// Requested title.
        title: String,
    },
    /// A stage is about to run.
    #[serde(rename = "stage.started")]
    StageStarted {
        /// Run identifier.
        run_id: Uuid,
        /// The stage.
        stage: StageName,
    },
    /// A stage finished and its output was merged.
    #[serde(rename = "stage.completed")]
    StageCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// The stage.
        stage: StageName,
        /// Context keys written.
        keys: Vec<String>,
        /// Stage duration in milliseconds.
        duration_ms: f64,
    },
    /// A stage failed after its retries.
    #[serde(rename = "stage.failed")]
    StageFailed {
        /// Run identifier.
        run_id: Uuid,
        /// The stage.
        stage: StageName,
        /// Error classification.
        kind: ErrorKind,
        /// Error message.
        message: String,
        /// Stage duration in milliseconds.
        duration_ms: f64,
    },
    /// Every stage succeeded.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted {
        /// Run identifier.
        run_id: Uuid,
        /// Run duration in milliseconds.
        duration_ms: f64,
    },
    /// The run stopped at a failing stage, or was rejected before starting.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed {
        /// Run identifier.
        run_id: Uuid,
        /// The failing stage, absent when the request was rejected.
        stage: Option<StageName>,
        /// Error classification.
        kind: ErrorKind,
        /// Error message.
        message: String,
        /// Run duration in milliseconds.
        duration_ms: f64,
    },
    /// A batch was admitted.
    #[serde(rename = "batch.started")]
    BatchStarted {
        /// Batch identifier.
        batch_id: Uuid,
        /// Number of requests.
        size: usize,
    },
    /// Every item of a batch finished.
    #[serde(rename = "batch.completed")]
    BatchCompleted {
        /// Batch identifier.
        batch_id: Uuid,
        /// Number of requests.
        total: usize,
        /// Items that completed.
        successful: usize,
        /// Items that failed.
        failed: usize,
        /// Batch duration in milliseconds.
        duration_ms: f64,
    },
}

impl PipelineEvent {
    /// The dotted event type, matching the serialized `type` tag.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PipelineStarted { .. } => "pipeline.started",
            Self::StageStarted { .. } => "stage.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::PipelineCompleted { .. } => "pipeline.completed",
            Self::PipelineFailed { .. } => "pipeline.failed",
            Self::BatchStarted { .. } => "batch.started",
            Self::BatchCompleted { .. } => "batch.completed",
        }
    }
}
