//! Pipeline stages and the data they work on.
//!
//! A content run always goes through the same three stages in the same
//! order: [`StageName::Script`], [`StageName::Voiceover`], then
//! [`StageName::Assets`].

mod builtin;
mod context;
mod executor;
mod request;

pub use builtin::{AssetStage, ScriptStage, VoiceoverStage, MAX_VOICEOVER_CHARS};
pub use context::{
    PipelineContext, StageData, KEY_PROCESSED_ASSETS, KEY_SCRIPT, KEY_SCRIPT_METRICS,
    KEY_VOICEOVER, KEY_VOICEOVER_METRICS,
};
pub use executor::{StageExecutor, StageOutcome};
pub use request::{AssetDescriptor, AssetKind, PipelineRequest, MAX_CONTENT_TYPE_LEN, MAX_TITLE_LEN};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};

/// Name of a pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Script generation.
    Script,
    /// Voiceover synthesis.
    Voiceover,
    /// Asset processing.
    Assets,
}

impl StageName {
    /// Every stage, in execution order.
    pub const ORDER: [StageName; 3] = [Self::Script, Self::Voiceover, Self::Assets];

    /// Lowercase name, also used as the metric operation name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::Voiceover => "voiceover",
            Self::Assets => "assets",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in a content run.
///
/// Implementations read the context and return the data to merge into it.
/// They may be invoked more than once for the same run when an attempt fails
/// or times out, so they must be safe to retry.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> StageName;

    /// Produces this stage's output.
    async fn run(&self, ctx: &PipelineContext) -> anyhow::Result<StageData>;
}
