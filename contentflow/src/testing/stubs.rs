//! Configurable in-memory generators.

use super::ConcurrencyProbe;
use crate::generators::{
    AssetProcessor, GeneratedScript, GeneratedVoiceover, ProcessedAsset, ScriptGenerator,
    ScriptMetrics, VoiceMetrics, VoiceoverGenerator,
};
use crate::stages::{AssetDescriptor, PipelineRequest};
use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How a stub behaves on each call.
///
/// Failure rules are checked in order: always, then the first `n` calls,
/// then matching keys. The key is the request title, or the asset id for
/// [`StubAssetProcessor`].
#[derive(Debug, Clone, Default)]
pub struct StubBehavior {
    latency: Duration,
    always_fail: bool,
    fail_first: usize,
    fail_keys: HashSet<String>,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl StubBehavior {
    /// Succeeds immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps for `latency` on every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fails every call.
    #[must_use]
    pub fn always_failing(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Fails the first `n` calls, then succeeds.
    #[must_use]
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Fails every call for `key`.
    #[must_use]
    pub fn failing_for(mut self, key: impl Into<String>) -> Self {
        self.fail_keys.insert(key.into());
        self
    }

    /// Reports every call to `probe` while it runs.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    async fn perform(&self, what: &str, key: &str, calls: &AtomicUsize) -> anyhow::Result<()> {
        let call = calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.probe.as_ref().map(|p| p.enter());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.always_fail {
            bail!("{what} unavailable");
        }
        if call < self.fail_first {
            bail!("{what} failed on call {}", call + 1);
        }
        if self.fail_keys.contains(key) {
            bail!("{what} rejected '{key}'");
        }
        Ok(())
    }
}

/// Script generator returning a canned script.
#[derive(Debug, Default)]
pub struct StubScriptGenerator {
    behavior: StubBehavior,
    calls: AtomicUsize,
}

impl StubScriptGenerator {
    /// Creates a stub with the given behavior.
    #[must_use]
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls made so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptGenerator for StubScriptGenerator {
    async fn generate(&self, request: &PipelineRequest) -> anyhow::Result<GeneratedScript> {
        self.behavior
            .perform("script generator", &request.title, &self.calls)
            .await?;

        let text = format!(
            "A short {} about {}. It opens with a question and closes with a summary.",
            request.content_type, request.title
        );
        let metrics = ScriptMetrics {
            engagement_score: 0.8,
            clarity_score: 0.9,
            seo_score: 0.7,
            audience_match: 0.85,
            ..ScriptMetrics::for_text(&text)
        };
        Ok(GeneratedScript { text, metrics })
    }
}

/// Voiceover generator returning the script bytes as audio.
#[derive(Debug, Default)]
pub struct StubVoiceoverGenerator {
    behavior: StubBehavior,
    calls: AtomicUsize,
}

impl StubVoiceoverGenerator {
    /// Creates a stub with the given behavior.
    #[must_use]
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls made so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VoiceoverGenerator for StubVoiceoverGenerator {
    async fn synthesize(
        &self,
        text: &str,
        request: &PipelineRequest,
    ) -> anyhow::Result<GeneratedVoiceover> {
        self.behavior
            .perform("voiceover generator", &request.title, &self.calls)
            .await?;

        let words = text.split_whitespace().count();
        Ok(GeneratedVoiceover {
            audio: text.as_bytes().to_vec(),
            metrics: VoiceMetrics {
                duration_seconds: words as f64 * 0.4,
                tempo: 150.0,
                rms_energy: 0.1,
                zero_crossings: text.len() as u64,
                generated_at: Utc::now(),
            },
        })
    }
}

/// Asset processor echoing its input.
#[derive(Debug, Default)]
pub struct StubAssetProcessor {
    behavior: StubBehavior,
    calls: AtomicUsize,
}

impl StubAssetProcessor {
    /// Creates a stub with the given behavior.
    #[must_use]
    pub fn new(behavior: StubBehavior) -> Self {
        Self {
            behavior,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls made so far, including failed ones.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetProcessor for StubAssetProcessor {
    async fn process(&self, asset: &AssetDescriptor) -> anyhow::Result<ProcessedAsset> {
        self.behavior
            .perform("asset processor", &asset.id, &self.calls)
            .await?;

        let mut processed = ProcessedAsset::from_descriptor(asset);
        processed.uri = Some(format!("processed://{}", asset.id));
        Ok(processed)
    }
}
