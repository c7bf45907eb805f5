//! Sequential execution of the content stages for one request.

use crate::errors::{ContentflowError, ErrorKind, Result};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::generators::{AssetProcessor, ScriptGenerator, VoiceoverGenerator};
use crate::metrics::MetricsCollector;
use crate::monitor::ResourceMonitor;
use crate::observability::SpanTimer;
use crate::stages::{
    AssetStage, PipelineContext, PipelineRequest, ScriptStage, Stage, StageExecutor, StageName,
    StageOutcome, VoiceoverStage,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Metric operation recorded once per pipeline run.
pub const PIPELINE_OPERATION: &str = "create_content_pipeline";

/// Lifecycle of a single pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "stage", rename_all = "snake_case")]
pub enum PipelineState {
    /// Not started.
    Pending,
    /// Running the given stage.
    Running(StageName),
    /// Every stage succeeded.
    Completed,
    /// Stopped at the given stage.
    Failed(StageName),
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running(stage) => write!(f, "running({stage})"),
            Self::Completed => write!(f, "completed"),
            Self::Failed(stage) => write!(f, "failed({stage})"),
        }
    }
}

impl PipelineState {
    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }

    /// Whether moving to `next` follows the fixed stage order.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running(StageName::Script)) => true,
            (Self::Running(StageName::Script), Self::Running(StageName::Voiceover)) => true,
            (Self::Running(StageName::Voiceover), Self::Running(StageName::Assets)) => true,
            (Self::Running(StageName::Assets), Self::Completed) => true,
            (Self::Running(current), Self::Failed(failed)) => current == failed,
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct RunMetadata<'a> {
    run_id: Uuid,
    content_type: &'a str,
    title: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    failed_stage: Option<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<ErrorKind>,
}

/// Drives one request through script, voiceover and assets.
///
/// An orchestrator is shared freely between tasks; each call to
/// [`run`](Self::run) owns its own [`PipelineContext`]. Stage failures stop
/// the run at that stage and are never retried across stage boundaries.
pub struct PipelineOrchestrator {
    executor: StageExecutor,
    stages: [Arc<dyn Stage>; 3],
    events: Arc<dyn EventSink>,
}

impl fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("executor", &self.executor)
            .field("stages", &self.stages)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Creates an orchestrator over the built-in stages.
    ///
    /// The asset stage uses the asset policy of the monitor's budget.
    #[must_use]
    pub fn new(
        monitor: Arc<ResourceMonitor>,
        script: Arc<dyn ScriptGenerator>,
        voiceover: Arc<dyn VoiceoverGenerator>,
        assets: Arc<dyn AssetProcessor>,
    ) -> Self {
        let policy = monitor.budget().assets.clone();
        Self {
            executor: StageExecutor::new(monitor),
            stages: [
                Arc::new(ScriptStage::new(script)),
                Arc::new(VoiceoverStage::new(voiceover)),
                Arc::new(AssetStage::new(assets, policy)),
            ],
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Creates an orchestrator over custom stage implementations.
    ///
    /// The stages must be given in execution order.
    pub fn with_stages(monitor: Arc<ResourceMonitor>, stages: [Arc<dyn Stage>; 3]) -> Result<Self> {
        for (stage, expected) in stages.iter().zip(StageName::ORDER) {
            if stage.name() != expected {
                return Err(ContentflowError::Config(format!(
                    "expected stage '{expected}' but got '{}'",
                    stage.name()
                )));
            }
        }

        Ok(Self {
            executor: StageExecutor::new(monitor),
            stages,
            events: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the shared resource monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        self.executor.monitor()
    }

    /// Returns the metrics collector.
    #[must_use]
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        self.executor.monitor().metrics()
    }

    /// Returns the event sink.
    #[must_use]
    pub fn events(&self) -> &Arc<dyn EventSink> {
        &self.events
    }

    /// Runs every stage for `request` and returns the accumulated context.
    ///
    /// The request is validated before any generator is called. On failure
    /// the error names the stage that failed.
    pub async fn run(&self, request: PipelineRequest) -> Result<PipelineContext> {
        let run_id = Uuid::new_v4();
        let span = info_span!(
            "pipeline",
            %run_id,
            content_type = %request.content_type,
        );
        self.run_inner(run_id, request).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, request: PipelineRequest) -> Result<PipelineContext> {
        let timer = SpanTimer::start(PIPELINE_OPERATION);

        if let Err(invalid) = request.validate() {
            let err = ContentflowError::from(invalid);
            warn!(error = %err, "Rejecting invalid pipeline request");
            self.finish_failed(run_id, &request, None, &err, timer).await;
            return Err(err);
        }

        self.events
            .emit(&PipelineEvent::PipelineStarted {
                run_id,
                content_type: request.content_type.clone(),
                title: request.title.clone(),
            })
            .await;
        info!(title = %request.title, "Pipeline started");

        let mut context = PipelineContext::new(request);
        let mut state = PipelineState::Pending;

        for stage in &self.stages {
            let name = stage.name();
            transition(&mut state, PipelineState::Running(name));
            self.events
                .emit(&PipelineEvent::StageStarted { run_id, stage: name })
                .await;

            match self.executor.run_stage(stage.as_ref(), &mut context).await {
                StageOutcome::Succeeded { keys, duration, .. } => {
                    info!(stage = %name, duration_ms = duration.as_millis() as u64, "Stage completed");
                    self.events
                        .emit(&PipelineEvent::StageCompleted {
                            run_id,
                            stage: name,
                            keys,
                            duration_ms: duration.as_secs_f64() * 1000.0,
                        })
                        .await;
                }
                StageOutcome::Failed { error, duration, .. } => {
                    transition(&mut state, PipelineState::Failed(name));
                    self.events
                        .emit(&PipelineEvent::StageFailed {
                            run_id,
                            stage: name,
                            kind: error.kind(),
                            message: error.to_string(),
                            duration_ms: duration.as_secs_f64() * 1000.0,
                        })
                        .await;

                    let err = ContentflowError::in_stage(name, error);
                    warn!(stage = %name, error = %err, "Pipeline failed");
                    self.finish_failed(run_id, context.request(), Some(name), &err, timer)
                        .await;
                    return Err(err);
                }
            }
        }

        transition(&mut state, PipelineState::Completed);
        let duration = timer.finish();
        self.metrics().record_with(
            PIPELINE_OPERATION,
            duration,
            true,
            &RunMetadata {
                run_id,
                content_type: &context.request().content_type,
                title: &context.request().title,
                failed_stage: None,
                error_kind: None,
            },
        );
        self.events
            .emit(&PipelineEvent::PipelineCompleted {
                run_id,
                duration_ms: duration.as_secs_f64() * 1000.0,
            })
            .await;
        info!(duration_ms = duration.as_millis() as u64, "Pipeline completed");

        Ok(context)
    }

    async fn finish_failed(
        &self,
        run_id: Uuid,
        request: &PipelineRequest,
        stage: Option<StageName>,
        err: &ContentflowError,
        timer: SpanTimer,
    ) {
        let duration = timer.finish();
        self.metrics().record_with(
            PIPELINE_OPERATION,
            duration,
            false,
            &RunMetadata {
                run_id,
                content_type: &request.content_type,
                title: &request.title,
                failed_stage: stage,
                error_kind: Some(err.kind()),
            },
        );
        self.events
            .emit(&PipelineEvent::PipelineFailed {
                run_id,
                stage,
                kind: err.kind(),
                message: err.to_string(),
                duration_ms: duration.as_secs_f64() * 1000.0,
            })
            .await;
    }
}

fn transition(state: &mut PipelineState, next: PipelineState) {
    debug_assert!(
        state.can_transition_to(next),
        "invalid pipeline transition {state} -> {next}"
    );
    debug!(from = %state, to = %next, "Pipeline state transition");
    *state = next;
}
