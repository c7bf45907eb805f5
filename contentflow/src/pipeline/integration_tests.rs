//! End-to-end tests for pipeline and batch orchestration.

#[cfg(test)]
mod tests {
    use crate::config::{ResourceBudget, StagePolicy};
    use crate::errors::{ContentflowError, ErrorKind};
    use crate::events::CollectingEventSink;
    use crate::generators::{
        GeneratedScript, MockAssetProcessor, MockScriptGenerator, MockVoiceoverGenerator,
        ScriptMetrics,
    };
    use crate::monitor::{BackoffConfig, ResourceMonitor};
    use crate::pipeline::{
        BatchOrchestrator, PipelineOrchestrator, BATCH_OPERATION, PIPELINE_OPERATION,
    };
    use crate::stages::{
        AssetDescriptor, AssetKind, AssetStage, PipelineContext, PipelineRequest, Stage,
        StageData, StageName, VoiceoverStage, MAX_VOICEOVER_CHARS,
    };
    use crate::testing::{
        ConcurrencyProbe, StubAssetProcessor, StubBehavior, StubScriptGenerator,
        StubVoiceoverGenerator,
    };
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn budget(workers: usize) -> ResourceBudget {
        ResourceBudget::new()
            .with_max_concurrent_workers(workers)
            .with_max_retries(2)
            .with_stage_timeout(Duration::from_secs(2))
            .with_backoff(BackoffConfig::immediate())
    }

    struct Harness {
        script: Arc<StubScriptGenerator>,
        voiceover: Arc<StubVoiceoverGenerator>,
        assets: Arc<StubAssetProcessor>,
        events: Arc<CollectingEventSink>,
        pipeline: Arc<PipelineOrchestrator>,
    }

    impl Harness {
        fn new(
            budget: ResourceBudget,
            script: StubBehavior,
            voiceover: StubBehavior,
            assets: StubBehavior,
        ) -> Self {
            let monitor = Arc::new(ResourceMonitor::new(budget).unwrap());
            let script = Arc::new(StubScriptGenerator::new(script));
            let voiceover = Arc::new(StubVoiceoverGenerator::new(voiceover));
            let assets = Arc::new(StubAssetProcessor::new(assets));
            let events = Arc::new(CollectingEventSink::new());

            let pipeline = PipelineOrchestrator::new(
                monitor,
                script.clone(),
                voiceover.clone(),
                assets.clone(),
            )
            .with_event_sink(events.clone());

            Self {
                script,
                voiceover,
                assets,
                events,
                pipeline: Arc::new(pipeline),
            }
        }

        fn healthy(budget: ResourceBudget) -> Self {
            Self::new(budget, StubBehavior::new(), StubBehavior::new(), StubBehavior::new())
        }

        fn batch(&self) -> BatchOrchestrator {
            BatchOrchestrator::new(Arc::clone(&self.pipeline))
        }
    }

    fn request(title: &str) -> PipelineRequest {
        PipelineRequest::new("explainer", title)
    }

    // --- single pipeline runs ---

    #[tokio::test]
    async fn test_pipeline_produces_all_stage_keys() {
        let h = Harness::healthy(budget(2));
        let request = request("Tides").with_asset(AssetDescriptor::new(
            "cover",
            AssetKind::Image,
            "image/png",
            2048,
        ));

        let ctx = h.pipeline.run(request).await.unwrap();

        assert_eq!(
            ctx.keys(),
            vec![
                "script",
                "script_metrics",
                "voiceover",
                "voiceover_metrics",
                "processed_assets"
            ]
        );
        assert!(ctx.script().unwrap().contains("Tides"));
        assert_eq!(ctx.voiceover().unwrap(), ctx.script().unwrap().as_bytes());
        assert_eq!(ctx.processed_assets().unwrap()[0].asset_id, "cover");

        let metrics = h.pipeline.metrics();
        for stage in StageName::ORDER {
            assert_eq!(metrics.operation(stage.as_str()).len(), 1, "{stage}");
        }
        let run = metrics.operation(PIPELINE_OPERATION);
        assert_eq!(run.len(), 1);
        assert!(run[0].success);
        assert_eq!(run[0].metadata["content_type"], "explainer");
    }

    #[tokio::test]
    async fn test_pipeline_event_sequence() {
        let h = Harness::healthy(budget(1));
        h.pipeline.run(request("Tides")).await.unwrap();

        assert_eq!(
            h.events.event_types(),
            vec![
                "pipeline.started",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "pipeline.completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_any_call() {
        let h = Harness::healthy(budget(2));

        let err = h
            .pipeline
            .run(PipelineRequest::new("explainer", ""))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.failed_stage(), None);
        assert_eq!(h.script.calls(), 0);
        assert_eq!(h.voiceover.calls(), 0);
        assert_eq!(h.events.event_types(), vec!["pipeline.failed"]);

        let run = h.pipeline.metrics().operation(PIPELINE_OPERATION);
        assert_eq!(run.len(), 1);
        assert!(!run[0].success);
    }

    #[tokio::test]
    async fn test_voiceover_failure_stops_pipeline() {
        let h = Harness::new(
            budget(2),
            StubBehavior::new(),
            StubBehavior::new().always_failing(),
            StubBehavior::new(),
        );
        let request = request("Tides").with_asset(AssetDescriptor::new(
            "cover",
            AssetKind::Image,
            "image/png",
            1,
        ));

        let err = h.pipeline.run(request).await.unwrap_err();

        assert_eq!(err.failed_stage(), Some(StageName::Voiceover));
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert_eq!(h.voiceover.calls(), 3, "first attempt plus two retries");
        assert_eq!(h.assets.calls(), 0, "assets never run after a failure");

        let failed = h.events.events_of_type("stage.failed");
        assert_eq!(failed.len(), 1);
        assert_eq!(h.events.event_types().last(), Some(&"pipeline.failed"));

        let run = h.pipeline.metrics().operation(PIPELINE_OPERATION).remove(0);
        assert_eq!(run.metadata["failed_stage"], "voiceover");
        assert_eq!(run.metadata["error_kind"], "retries_exhausted");
    }

    #[tokio::test]
    async fn test_transient_script_failure_is_retried() {
        let h = Harness::new(
            budget(2),
            StubBehavior::new().failing_first(2),
            StubBehavior::new(),
            StubBehavior::new(),
        );

        let ctx = h.pipeline.run(request("Tides")).await.unwrap();

        assert!(ctx.script().is_some());
        assert_eq!(h.script.calls(), 3);
        let script_metric = h.pipeline.metrics().operation("script").remove(0);
        assert_eq!(script_metric.metadata["attempts"], 3);
    }

    #[tokio::test]
    async fn test_stage_timeout_override() {
        let budget = budget(2).with_stage_policy(
            StageName::Script,
            StagePolicy::new()
                .with_timeout(Duration::from_millis(20))
                .with_max_retries(1),
        );
        let h = Harness::new(
            budget,
            StubBehavior::new().with_latency(Duration::from_millis(500)),
            StubBehavior::new(),
            StubBehavior::new(),
        );

        let err = h.pipeline.run(request("Slow")).await.unwrap_err();

        assert_eq!(err.failed_stage(), Some(StageName::Script));
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(h.script.calls(), 2);
        assert_eq!(h.voiceover.calls(), 0);
    }

    #[derive(Debug)]
    struct LongScriptStage;

    #[async_trait]
    impl Stage for LongScriptStage {
        fn name(&self) -> StageName {
            StageName::Script
        }

        async fn run(&self, _ctx: &PipelineContext) -> anyhow::Result<StageData> {
            let text = "word ".repeat(MAX_VOICEOVER_CHARS);
            Ok(StageData::Script(GeneratedScript {
                metrics: ScriptMetrics::for_text(&text),
                text,
            }))
        }
    }

    #[tokio::test]
    async fn test_overlong_script_fails_voiceover_without_retry() {
        let monitor = Arc::new(ResourceMonitor::new(budget(1)).unwrap());
        let voiceover = Arc::new(StubVoiceoverGenerator::default());
        let assets = Arc::new(StubAssetProcessor::default());

        let pipeline = PipelineOrchestrator::with_stages(
            Arc::clone(&monitor),
            [
                Arc::new(LongScriptStage),
                Arc::new(VoiceoverStage::new(voiceover.clone())),
                Arc::new(AssetStage::new(assets, monitor.budget().assets.clone())),
            ],
        )
        .unwrap();

        let err = pipeline.run(request("Essay")).await.unwrap_err();

        assert_eq!(err.failed_stage(), Some(StageName::Voiceover));
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(voiceover.calls(), 0);
        assert_eq!(monitor.metrics().operation("voiceover")[0].metadata["attempts"], 1);
    }

    #[tokio::test]
    async fn test_with_stages_rejects_wrong_order() {
        let monitor = Arc::new(ResourceMonitor::new(budget(1)).unwrap());
        let voiceover: Arc<dyn Stage> =
            Arc::new(VoiceoverStage::new(Arc::new(StubVoiceoverGenerator::default())));

        let err = PipelineOrchestrator::with_stages(
            monitor,
            [Arc::clone(&voiceover), Arc::new(LongScriptStage), voiceover],
        )
        .unwrap_err();

        assert!(matches!(err, ContentflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_pipeline_with_mocked_generators() {
        let mut script = MockScriptGenerator::new();
        script.expect_generate().times(1).returning(|request| {
            let text = format!("script for {}", request.title);
            Ok(GeneratedScript {
                metrics: ScriptMetrics::for_text(&text),
                text,
            })
        });

        let mut voiceover = MockVoiceoverGenerator::new();
        voiceover
            .expect_synthesize()
            .withf(|text, _| text == "script for Mocked")
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("quota exceeded")));

        let mut assets = MockAssetProcessor::new();
        assets.expect_process().never();

        let monitor = Arc::new(ResourceMonitor::new(budget(1).with_max_retries(0)).unwrap());
        let pipeline = PipelineOrchestrator::new(
            monitor,
            Arc::new(script),
            Arc::new(voiceover),
            Arc::new(assets),
        );

        let err = pipeline.run(request("Mocked")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Work);
        assert!(err.to_string().contains("quota exceeded"));
    }

    // --- batches ---

    #[tokio::test]
    async fn test_batch_partial_failure() {
        let h = Harness::new(
            budget(2),
            StubBehavior::new(),
            StubBehavior::new().failing_for("Second"),
            StubBehavior::new(),
        );

        let result = h
            .batch()
            .run_batch(vec![request("First"), request("Second"), request("Third")])
            .await
            .unwrap();

        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(result.results.len(), 3);
        assert!(!result.all_succeeded());

        assert!(result.results[0].is_success());
        assert_eq!(result.results[1].failed_stage(), Some(StageName::Voiceover));
        assert!(result.results[2].is_success());
        assert_eq!(
            result.results[2].context().unwrap().request().title,
            "Third"
        );

        let failures: Vec<usize> = result.failures().map(|(i, _)| i).collect();
        assert_eq!(failures, vec![1]);
        assert!(result.completed_at >= result.started_at);
    }

    #[tokio::test]
    async fn test_batch_over_limit_rejected_before_dispatch() {
        let h = Harness::healthy(budget(2).with_max_batch_size(2));

        let err = h
            .batch()
            .run_batch(vec![request("a"), request("b"), request("c")])
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ContentflowError::BatchSizeExceeded { size: 3, max: 2 }
        ));
        assert_eq!(h.script.calls(), 0);
        assert!(h.events.is_empty());
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let h = Harness::healthy(budget(2));
        let result = h.batch().run_batch(Vec::new()).await.unwrap();

        assert_eq!(result.total, 0);
        assert!(result.results.is_empty());
        assert!(result.all_succeeded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_batch_respects_worker_budget() {
        let probe = Arc::new(ConcurrencyProbe::new());
        let slow = || {
            StubBehavior::new()
                .with_latency(Duration::from_millis(15))
                .with_probe(Arc::clone(&probe))
        };
        let h = Harness::new(budget(2), slow(), slow(), slow());

        let requests = (0..8).map(|i| request(&format!("Item {i}"))).collect();
        let result = h.batch().run_batch(requests).await.unwrap();

        assert_eq!(result.successful, 8);
        assert!(probe.peak() <= 2, "peak was {}", probe.peak());
        assert_eq!(probe.entries(), 16, "script and voiceover for each item");
        assert_eq!(h.pipeline.monitor().available_slots(), 2);
    }

    #[derive(Debug)]
    struct DelayedScriptStage;

    #[async_trait]
    impl Stage for DelayedScriptStage {
        fn name(&self) -> StageName {
            StageName::Script
        }

        async fn run(&self, ctx: &PipelineContext) -> anyhow::Result<StageData> {
            let delay = ctx.request().parameters["delay_ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let text = ctx.request().title.clone();
            Ok(StageData::Script(GeneratedScript {
                metrics: ScriptMetrics::for_text(&text),
                text,
            }))
        }
    }

    #[derive(Debug)]
    struct PanickingAssetStage;

    #[async_trait]
    impl Stage for PanickingAssetStage {
        fn name(&self) -> StageName {
            StageName::Assets
        }

        async fn run(&self, ctx: &PipelineContext) -> anyhow::Result<StageData> {
            assert!(ctx.request().title != "boom", "asset stage blew up");
            Ok(StageData::Assets(Vec::new()))
        }
    }

    fn custom_pipeline(workers: usize) -> Arc<PipelineOrchestrator> {
        let monitor = Arc::new(ResourceMonitor::new(budget(workers)).unwrap());
        let voiceover = Arc::new(StubVoiceoverGenerator::default());
        Arc::new(
            PipelineOrchestrator::with_stages(
                monitor,
                [
                    Arc::new(DelayedScriptStage),
                    Arc::new(VoiceoverStage::new(voiceover)),
                    Arc::new(PanickingAssetStage),
                ],
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let pipeline = custom_pipeline(4);
        let requests = [80u64, 10, 40, 0]
            .iter()
            .enumerate()
            .map(|(i, delay)| request(&format!("Item {i}")).with_parameter("delay_ms", *delay))
            .collect();

        let result = BatchOrchestrator::new(pipeline)
            .run_batch(requests)
            .await
            .unwrap();

        let titles: Vec<String> = result
            .results
            .iter()
            .map(|r| r.context().unwrap().script().unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["Item 0", "Item 1", "Item 2", "Item 3"]);
    }

    #[tokio::test]
    async fn test_batch_isolates_panicking_item() {
        let pipeline = custom_pipeline(2);
        let requests = vec![
            request("fine").with_parameter("delay_ms", 0),
            request("boom").with_parameter("delay_ms", 0),
        ];

        let result = BatchOrchestrator::new(Arc::clone(&pipeline))
            .run_batch(requests)
            .await
            .unwrap();

        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        match &result.results[1] {
            crate::pipeline::BatchItemOutcome::Failed { stage, kind, .. } => {
                assert_eq!(*stage, None);
                assert_eq!(*kind, ErrorKind::Internal);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(pipeline.monitor().available_slots(), 2);
    }

    #[tokio::test]
    async fn test_batch_metric_and_events() {
        let h = Harness::new(
            budget(3),
            StubBehavior::new().failing_for("bad"),
            StubBehavior::new(),
            StubBehavior::new(),
        );

        let result = h
            .batch()
            .run_batch(vec![request("good"), request("bad")])
            .await
            .unwrap();

        let batch_metrics = h.pipeline.metrics().operation(BATCH_OPERATION);
        assert_eq!(batch_metrics.len(), 1);
        assert_eq!(batch_metrics[0].metadata["total"], 2);
        assert_eq!(batch_metrics[0].metadata["successful"], 1);
        assert_eq!(batch_metrics[0].metadata["failed"], 1);
        assert_eq!(
            batch_metrics[0].metadata["batch_id"],
            result.batch_id.to_string()
        );

        let types = h.events.event_types();
        assert_eq!(types.first(), Some(&"batch.started"));
        assert_eq!(types.last(), Some(&"batch.completed"));
        assert_eq!(h.pipeline.metrics().operation(PIPELINE_OPERATION).len(), 2);
    }

    #[tokio::test]
    async fn test_single_worker_serializes_batch_items() {
        let h = Harness::new(
            budget(1),
            StubBehavior::new().with_latency(Duration::from_millis(50)),
            StubBehavior::new(),
            StubBehavior::new(),
        );

        let started = std::time::Instant::now();
        let result = h
            .batch()
            .run_batch(vec![request("one"), request("two")])
            .await
            .unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(h.script.calls(), 2);
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(result.duration >= Duration::from_millis(100));
    }
}
