//! Runs one named stage through the resource monitor.

use super::context::{PipelineContext, StageData};
use super::{Stage, StageName};
use crate::errors::{ContentflowError, ErrorKind, Result};
use crate::monitor::{ExecuteOptions, ResourceMonitor};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of running a single stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// The stage succeeded and its output was merged.
    ///
    /// Only the written keys are kept here; their values live in the
    /// context and are read back with [`StageOutcome::produced`].
    Succeeded {
        /// The stage that ran.
        stage: StageName,
        /// Context keys the stage wrote.
        keys: Vec<String>,
        /// Time spent in the stage, including queueing.
        duration: Duration,
    },
    /// The stage failed; the context was left untouched.
    Failed {
        /// The stage that ran.
        stage: StageName,
        /// Why it failed.
        error: ContentflowError,
        /// Time spent in the stage, including queueing.
        duration: Duration,
    },
}

impl StageOutcome {
    /// The stage this outcome belongs to.
    #[must_use]
    pub fn stage(&self) -> StageName {
        match self {
            Self::Succeeded { stage, .. } | Self::Failed { stage, .. } => *stage,
        }
    }

    /// Whether the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Error classification of a failed stage.
    #[must_use]
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error, .. } => Some(error.kind()),
        }
    }

    /// Error message of a failed stage.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Failed { error, .. } => Some(error.to_string()),
        }
    }

    /// Values the stage produced, read from the context it was merged into.
    ///
    /// Empty for a failed stage. Audio appears summarized, as in
    /// [`PipelineContext::to_map`].
    #[must_use]
    pub fn produced(&self, context: &PipelineContext) -> HashMap<String, serde_json::Value> {
        let Self::Succeeded { keys, .. } = self else {
            return HashMap::new();
        };
        let mut map = context.to_map();
        map.retain(|key, _| keys.contains(key));
        map
    }

    /// Wall-clock time of the stage.
    #[must_use]
    pub fn duration(&self) -> Duration {
        match self {
            Self::Succeeded { duration, .. } | Self::Failed { duration, .. } => *duration,
        }
    }

    /// Converts to a result, wrapping failures with the stage name.
    pub fn into_result(self) -> Result<Vec<String>> {
        match self {
            Self::Succeeded { keys, .. } => Ok(keys),
            Self::Failed { stage, error, .. } => Err(ContentflowError::in_stage(stage, error)),
        }
    }
}

/// Executes stages under the shared resource budget.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    monitor: Arc<ResourceMonitor>,
}

impl StageExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new(monitor: Arc<ResourceMonitor>) -> Self {
        Self { monitor }
    }

    /// Returns the underlying monitor.
    #[must_use]
    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    /// Runs `work` as `stage` and merges its output into `context`.
    ///
    /// `work` receives a read-only snapshot of the context taken before the
    /// first attempt and may be called again on retry. The stage's timeout
    /// and retry count come from the budget, honoring per-stage overrides.
    pub async fn run<F, Fut>(
        &self,
        stage: StageName,
        context: &mut PipelineContext,
        mut work: F,
    ) -> StageOutcome
    where
        F: FnMut(Arc<PipelineContext>) -> Fut,
        Fut: Future<Output = anyhow::Result<StageData>>,
    {
        let budget = self.monitor.budget();
        let options = ExecuteOptions::new()
            .with_timeout(budget.timeout_for(stage))
            .with_max_retries(budget.retries_for(stage));

        let snapshot = Arc::new(context.clone());
        let started = Instant::now();
        let result = self
            .monitor
            .execute_with(stage.as_str(), options, || work(Arc::clone(&snapshot)))
            .await;
        let duration = started.elapsed();

        match result {
            Ok(data) => {
                let keys = context.merge(data);
                debug!(stage = %stage, keys = ?keys, "Stage output merged");
                StageOutcome::Succeeded {
                    stage,
                    keys,
                    duration,
                }
            }
            Err(error) => StageOutcome::Failed {
                stage,
                error,
                duration,
            },
        }
    }

    /// Runs a [`Stage`] implementation.
    pub async fn run_stage(&self, stage: &dyn Stage, context: &mut PipelineContext) -> StageOutcome {
        self.run(stage.name(), context, |snapshot| async move {
            stage.run(&snapshot).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceBudget, StagePolicy};
    use crate::generators::{GeneratedScript, ScriptMetrics};
    use crate::monitor::BackoffConfig;
    use crate::stages::PipelineRequest;
    use crate::generators::{GeneratedVoiceover, VoiceMetrics};
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor(budget: ResourceBudget) -> StageExecutor {
        StageExecutor::new(Arc::new(ResourceMonitor::new(budget).unwrap()))
    }

    fn fast_budget() -> ResourceBudget {
        ResourceBudget::new()
            .with_max_retries(2)
            .with_stage_timeout(Duration::from_secs(1))
            .with_backoff(BackoffConfig::immediate())
    }

    fn context() -> PipelineContext {
        PipelineContext::new(PipelineRequest::new("explainer", "Tides"))
    }

    #[tokio::test]
    async fn test_success_merges_output() {
        let executor = executor(fast_budget());
        let mut ctx = context();

        let outcome = executor
            .run(StageName::Script, &mut ctx, |snapshot| async move {
                let text = format!("about {}", snapshot.request().title);
                Ok(StageData::Script(GeneratedScript {
                    metrics: ScriptMetrics::for_text(&text),
                    text,
                }))
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.stage(), StageName::Script);
        assert_eq!(ctx.script(), Some("about Tides"));
        assert_eq!(
            outcome.into_result().unwrap(),
            vec!["script".to_string(), "script_metrics".to_string()]
        );
        assert_eq!(executor.monitor().metrics().operation("script").len(), 1);
    }

    #[tokio::test]
    async fn test_failure_leaves_context_untouched() {
        let executor = executor(fast_budget());
        let mut ctx = context();
        let before = ctx.clone();

        let outcome = executor
            .run(StageName::Voiceover, &mut ctx, |_| async {
                Err(anyhow::anyhow!("tts unavailable"))
            })
            .await;

        assert!(!outcome.is_success());
        assert_eq!(outcome.kind(), Some(ErrorKind::RetriesExhausted));
        assert!(outcome.message().unwrap().contains("tts unavailable"));
        assert_eq!(ctx, before);

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.failed_stage(), Some(StageName::Voiceover));
    }

    #[tokio::test]
    async fn test_stage_override_applies() {
        let budget = fast_budget().with_stage_policy(
            StageName::Assets,
            StagePolicy::new()
                .with_max_retries(0)
                .with_timeout(Duration::from_millis(10)),
        );
        let executor = executor(budget);
        let mut ctx = context();
        let calls = AtomicUsize::new(0);

        let outcome = executor
            .run(StageName::Assets, &mut ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(StageData::Assets(Vec::new()))
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_retry_sees_same_snapshot() {
        let executor = executor(fast_budget());
        let mut ctx = context();
        ctx.merge(StageData::Custom(HashMap::from([("seed".to_string(), json!(7))])));
        let calls = AtomicUsize::new(0);

        let outcome = executor
            .run(StageName::Script, &mut ctx, |snapshot| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    assert_eq!(snapshot.extra("seed"), Some(&json!(7)));
                    if n == 0 {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(StageData::Custom(HashMap::from([(
                            "result".to_string(),
                            json!(n),
                        )])))
                    }
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(ctx.extra("result"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_produced_reads_values_from_context() {
        let executor = executor(fast_budget());
        let mut ctx = context();
        ctx.merge(StageData::Custom(HashMap::from([("seed".to_string(), json!(7))])));

        let outcome = executor
            .run(StageName::Script, &mut ctx, |_| async {
                Ok(StageData::Script(GeneratedScript {
                    metrics: ScriptMetrics::for_text("short and sweet"),
                    text: "short and sweet".to_string(),
                }))
            })
            .await;

        let produced = outcome.produced(&ctx);
        assert_eq!(produced.len(), 2);
        assert_eq!(produced["script"], "short and sweet");
        assert_eq!(produced["script_metrics"]["word_count"], 3);
        assert!(!produced.contains_key("seed"));

        let failed = executor
            .run(StageName::Voiceover, &mut ctx, |_| async {
                Err(anyhow::anyhow!("tts unavailable"))
            })
            .await;
        assert!(failed.produced(&ctx).is_empty());
    }

    #[tokio::test]
    async fn test_attempts_share_audio_with_context() {
        let executor = executor(fast_budget());
        let mut ctx = context();
        ctx.merge(StageData::Voiceover(GeneratedVoiceover {
            audio: vec![1; 1 << 20],
            metrics: VoiceMetrics {
                duration_seconds: 60.0,
                tempo: 110.0,
                rms_energy: 0.3,
                zero_crossings: 1000,
                generated_at: Utc::now(),
            },
        }));
        let audio_ptr = ctx.voiceover().unwrap().as_ptr() as usize;
        let seen = Mutex::new(Vec::new());

        let outcome = executor
            .run(StageName::Assets, &mut ctx, |snapshot| {
                let mut seen_now = seen.lock();
                seen_now.push(snapshot.voiceover().unwrap().as_ptr() as usize);
                let first = seen_now.len() == 1;
                drop(seen_now);
                async move {
                    if first {
                        Err(anyhow::anyhow!("transient"))
                    } else {
                        Ok(StageData::Assets(Vec::new()))
                    }
                }
            })
            .await;

        assert!(outcome.is_success());
        assert_eq!(*seen.lock(), vec![audio_ptr, audio_ptr]);
    }
}
