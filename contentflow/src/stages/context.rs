//! Per-run context accumulated across stages.

use super::request::PipelineRequest;
use crate::generators::{
    GeneratedScript, GeneratedVoiceover, ProcessedAsset, ScriptMetrics, VoiceMetrics,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Key of the script text.
pub const KEY_SCRIPT: &str = "script";
/// Key of the script metrics.
pub const KEY_SCRIPT_METRICS: &str = "script_metrics";
/// Key of the voiceover audio.
pub const KEY_VOICEOVER: &str = "voiceover";
/// Key of the voiceover metrics.
pub const KEY_VOICEOVER_METRICS: &str = "voiceover_metrics";
/// Key of the processed assets.
pub const KEY_PROCESSED_ASSETS: &str = "processed_assets";

const RESERVED_KEYS: [&str; 5] = [
    KEY_SCRIPT,
    KEY_SCRIPT_METRICS,
    KEY_VOICEOVER,
    KEY_VOICEOVER_METRICS,
    KEY_PROCESSED_ASSETS,
];

/// Output of one stage, merged into the [`PipelineContext`].
#[derive(Debug, Clone, PartialEq)]
pub enum StageData {
    /// Writes `script` and `script_metrics`.
    Script(GeneratedScript),
    /// Writes `voiceover` and `voiceover_metrics`.
    Voiceover(GeneratedVoiceover),
    /// Writes `processed_assets`.
    Assets(Vec<ProcessedAsset>),
    /// Writes arbitrary extra keys.
    Custom(HashMap<String, serde_json::Value>),
}

/// State carried through one pipeline run.
///
/// Owned by a single orchestrator invocation and never shared between runs.
/// Stages see it read-only; only the stage executor merges into it.
/// Script text, audio and processed assets are reference counted, so the
/// snapshot handed to each stage does not copy them.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineContext {
    request: PipelineRequest,
    script: Option<Arc<str>>,
    script_metrics: Option<ScriptMetrics>,
    voiceover: Option<Arc<[u8]>>,
    voiceover_metrics: Option<VoiceMetrics>,
    processed_assets: Option<Arc<[ProcessedAsset]>>,
    extra: HashMap<String, serde_json::Value>,
}

impl PipelineContext {
    /// Creates an empty context for `request`.
    #[must_use]
    pub fn new(request: PipelineRequest) -> Self {
        Self {
            request,
            script: None,
            script_metrics: None,
            voiceover: None,
            voiceover_metrics: None,
            processed_assets: None,
            extra: HashMap::new(),
        }
    }

    /// The request this run was started with.
    #[must_use]
    pub fn request(&self) -> &PipelineRequest {
        &self.request
    }

    /// Generated script text.
    #[must_use]
    pub fn script(&self) -> Option<&str> {
        self.script.as_deref()
    }

    /// Script quality metrics.
    #[must_use]
    pub fn script_metrics(&self) -> Option<&ScriptMetrics> {
        self.script_metrics.as_ref()
    }

    /// Voiceover audio bytes.
    #[must_use]
    pub fn voiceover(&self) -> Option<&[u8]> {
        self.voiceover.as_deref()
    }

    /// Voiceover acoustic metrics.
    #[must_use]
    pub fn voiceover_metrics(&self) -> Option<&VoiceMetrics> {
        self.voiceover_metrics.as_ref()
    }

    /// Assets produced by the asset stage.
    #[must_use]
    pub fn processed_assets(&self) -> Option<&[ProcessedAsset]> {
        self.processed_assets.as_deref()
    }

    /// Value written by a custom stage.
    #[must_use]
    pub fn extra(&self, key: &str) -> Option<&serde_json::Value> {
        self.extra.get(key)
    }

    /// Whether `key` has been written.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        match key {
            KEY_SCRIPT => self.script.is_some(),
            KEY_SCRIPT_METRICS => self.script_metrics.is_some(),
            KEY_VOICEOVER => self.voiceover.is_some(),
            KEY_VOICEOVER_METRICS => self.voiceover_metrics.is_some(),
            KEY_PROCESSED_ASSETS => self.processed_assets.is_some(),
            other => self.extra.contains_key(other),
        }
    }

    /// Populated keys: built-in keys in stage order, then custom keys sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = RESERVED_KEYS
            .iter()
            .filter(|k| self.contains_key(k))
            .map(|k| (*k).to_string())
            .collect();
        let mut custom: Vec<String> = self.extra.keys().cloned().collect();
        custom.sort();
        keys.extend(custom);
        keys
    }

    /// Keyed JSON view of every populated entry.
    ///
    /// Audio is summarized as `{"size_bytes": n}` rather than inlined.
    #[must_use]
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        let mut map = self.extra.clone();
        if let Some(ref script) = self.script {
            map.insert(KEY_SCRIPT.to_string(), json!(&**script));
        }
        if let Some(ref metrics) = self.script_metrics {
            map.insert(KEY_SCRIPT_METRICS.to_string(), json!(metrics));
        }
        if let Some(ref audio) = self.voiceover {
            map.insert(KEY_VOICEOVER.to_string(), json!({ "size_bytes": audio.len() }));
        }
        if let Some(ref metrics) = self.voiceover_metrics {
            map.insert(KEY_VOICEOVER_METRICS.to_string(), json!(metrics));
        }
        if let Some(ref assets) = self.processed_assets {
            map.insert(KEY_PROCESSED_ASSETS.to_string(), json!(&**assets));
        }
        map
    }

    /// Merges stage output, returning the keys written.
    ///
    /// Later writes replace earlier ones. Replacing a populated key is logged.
    /// Custom output may not use the built-in key names; such entries are
    /// logged and dropped.
    pub fn merge(&mut self, data: StageData) -> Vec<String> {
        match data {
            StageData::Script(script) => {
                self.note_overwrite(KEY_SCRIPT);
                self.note_overwrite(KEY_SCRIPT_METRICS);
                self.script = Some(script.text.into());
                self.script_metrics = Some(script.metrics);
                vec![KEY_SCRIPT.to_string(), KEY_SCRIPT_METRICS.to_string()]
            }
            StageData::Voiceover(voiceover) => {
                self.note_overwrite(KEY_VOICEOVER);
                self.note_overwrite(KEY_VOICEOVER_METRICS);
                self.voiceover = Some(voiceover.audio.into());
                self.voiceover_metrics = Some(voiceover.metrics);
                vec![KEY_VOICEOVER.to_string(), KEY_VOICEOVER_METRICS.to_string()]
            }
            StageData::Assets(assets) => {
                self.note_overwrite(KEY_PROCESSED_ASSETS);
                self.processed_assets = Some(assets.into());
                vec![KEY_PROCESSED_ASSETS.to_string()]
            }
            StageData::Custom(values) => {
                let mut written = Vec::with_capacity(values.len());
                for (key, value) in values {
                    if RESERVED_KEYS.contains(&key.as_str()) {
                        warn!(key = %key, "Custom stage output uses a built-in key, dropping it");
                        continue;
                    }
                    self.note_overwrite(&key);
                    self.extra.insert(key.clone(), value);
                    written.push(key);
                }
                written.sort();
                written
            }
        }
    }

    fn note_overwrite(&self, key: &str) {
        if self.contains_key(key) {
            warn!(key, title = %self.request.title, "Stage output overwrites existing context key");
        }
    }
}
