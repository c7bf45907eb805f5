//! External collaborators driven by the pipeline stages.
//!
//! Generators are opaque, possibly slow, possibly failing. Their errors are
//! plain [`anyhow::Error`] values; returning a
//! [`ValidationError`](crate::errors::ValidationError) tells the monitor the
//! call should not be retried.

use crate::stages::{AssetDescriptor, AssetKind, PipelineRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Quality metrics reported for a generated script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptMetrics {
    /// Predicted audience engagement, 0.0 to 1.0.
    pub engagement_score: f64,
    /// Readability, 0.0 to 1.0.
    pub clarity_score: f64,
    /// Search relevance, 0.0 to 1.0.
    pub seo_score: f64,
    /// Fit with the target audience, 0.0 to 1.0.
    pub audience_match: f64,
    /// Words in the script.
    pub word_count: usize,
    /// When the script was generated.
    pub generated_at: DateTime<Utc>,
}

impl ScriptMetrics {
    /// Metrics with neutral scores for `text`, stamped now.
    #[must_use]
    pub fn for_text(text: &str) -> Self {
        Self {
            engagement_score: 0.0,
            clarity_score: 0.0,
            seo_score: 0.0,
            audience_match: 0.0,
            word_count: text.split_whitespace().count(),
            generated_at: Utc::now(),
        }
    }
}

/// Output of a [`ScriptGenerator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedScript {
    /// The script text.
    pub text: String,
    /// Quality metrics.
    pub metrics: ScriptMetrics,
}

/// Acoustic metrics reported for a generated voiceover.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMetrics {
    /// Audio length in seconds.
    pub duration_seconds: f64,
    /// Estimated tempo in beats per minute.
    pub tempo: f64,
    /// Root-mean-square energy.
    pub rms_energy: f64,
    /// Zero crossings in the signal.
    pub zero_crossings: u64,
    /// When the audio was generated.
    pub generated_at: DateTime<Utc>,
}

/// Output of a [`VoiceoverGenerator`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedVoiceover {
    /// Encoded audio.
    pub audio: Vec<u8>,
    /// Acoustic metrics.
    pub metrics: VoiceMetrics,
}

/// An asset after it went through the [`AssetProcessor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedAsset {
    /// Id of the source descriptor.
    pub asset_id: String,
    /// Asset kind.
    pub kind: AssetKind,
    /// MIME type of the processed output.
    pub mime_type: String,
    /// Size of the processed output in bytes.
    pub size_bytes: u64,
    /// Where the processed output lives, if stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    /// Processor specific details.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ProcessedAsset {
    /// Creates a processed asset mirroring its descriptor.
    #[must_use]
    pub fn from_descriptor(asset: &AssetDescriptor) -> Self {
        Self {
            asset_id: asset.id.clone(),
            kind: asset.kind,
            mime_type: asset.mime_type.clone(),
            size_bytes: asset.size_bytes,
            uri: asset.uri.clone(),
            metadata: HashMap::new(),
        }
    }
}

/// Turns a content request into a script.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Generates a script for `request`.
    async fn generate(&self, request: &PipelineRequest) -> anyhow::Result<GeneratedScript>;
}

/// Turns script text into audio.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceoverGenerator: Send + Sync {
    /// Synthesizes `text` for `request`.
    async fn synthesize(
        &self,
        text: &str,
        request: &PipelineRequest,
    ) -> anyhow::Result<GeneratedVoiceover>;
}

/// Processes one media asset.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssetProcessor: Send + Sync {
    /// Processes `asset`.
    async fn process(&self, asset: &AssetDescriptor) -> anyhow::Result<ProcessedAsset>;
}
