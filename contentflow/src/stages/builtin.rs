//! The three stages of a content run.

use super::context::{PipelineContext, StageData};
use super::{Stage, StageName};
use crate::config::AssetPolicy;
use crate::errors::ValidationError;
use crate::generators::{AssetProcessor, ScriptGenerator, VoiceoverGenerator};
use async_trait::async_trait;
use futures::future::try_join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Longest script the voiceover stage will synthesize, in characters.
pub const MAX_VOICEOVER_CHARS: usize = 5000;

/// Generates the script for a request.
#[derive(Clone)]
pub struct ScriptStage {
    generator: Arc<dyn ScriptGenerator>,
}

impl ScriptStage {
    /// Creates a new script stage.
    #[must_use]
    pub fn new(generator: Arc<dyn ScriptGenerator>) -> Self {
        Self { generator }
    }
}

impl fmt::Debug for ScriptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for ScriptStage {
    fn name(&self) -> StageName {
        StageName::Script
    }

    async fn run(&self, ctx: &PipelineContext) -> anyhow::Result<StageData> {
        let script = self.generator.generate(ctx.request()).await?;
        Ok(StageData::Script(script))
    }
}

/// Synthesizes audio from the generated script.
#[derive(Clone)]
pub struct VoiceoverStage {
    generator: Arc<dyn VoiceoverGenerator>,
}

impl VoiceoverStage {
    /// Creates a new voiceover stage.
    #[must_use]
    pub fn new(generator: Arc<dyn VoiceoverGenerator>) -> Self {
        Self { generator }
    }
}

impl fmt::Debug for VoiceoverStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VoiceoverStage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for VoiceoverStage {
    fn name(&self) -> StageName {
        StageName::Voiceover
    }

    async fn run(&self, ctx: &PipelineContext) -> anyhow::Result<StageData> {
        let text = ctx.script().ok_or_else(|| {
            ValidationError::for_field("script", "no script available for voiceover")
        })?;

        let chars = text.chars().count();
        if chars > MAX_VOICEOVER_CHARS {
            return Err(ValidationError::for_field(
                "script",
                format!("script has {chars} characters, voiceover accepts at most {MAX_VOICEOVER_CHARS}"),
            )
            .into());
        }

        let voiceover = self.generator.synthesize(text, ctx.request()).await?;
        Ok(StageData::Voiceover(voiceover))
    }
}

/// Processes the request's assets that pass the [`AssetPolicy`].
#[derive(Clone)]
pub struct AssetStage {
    processor: Arc<dyn AssetProcessor>,
    policy: AssetPolicy,
}

impl AssetStage {
    /// Creates a new asset stage.
    #[must_use]
    pub fn new(processor: Arc<dyn AssetProcessor>, policy: AssetPolicy) -> Self {
        Self { processor, policy }
    }
}

impl fmt::Debug for AssetStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetStage")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for AssetStage {
    fn name(&self) -> StageName {
        StageName::Assets
    }

    async fn run(&self, ctx: &PipelineContext) -> anyhow::Result<StageData> {
        let accepted: Vec<_> = ctx
            .request()
            .assets
            .iter()
            .filter(|asset| {
                let ok = self
                    .policy
                    .accepts(asset.kind, &asset.mime_type, asset.size_bytes);
                if !ok {
                    warn!(
                        asset_id = %asset.id,
                        kind = %asset.kind,
                        mime_type = %asset.mime_type,
                        size_bytes = asset.size_bytes,
                        "Skipping asset rejected by policy"
                    );
                }
                ok
            })
            .collect();

        debug!(
            accepted = accepted.len(),
            total = ctx.request().assets.len(),
            "Processing assets"
        );

        let processed =
            try_join_all(accepted.into_iter().map(|asset| self.processor.process(asset))).await?;
        Ok(StageData::Assets(processed))
    }
}
