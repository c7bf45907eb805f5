//! Configuration for the orchestration engine.
//!
//! A [`ResourceBudget`] is built once (from defaults, a JSON document, or the
//! environment), validated, and then shared read-only by every component.

use crate::errors::{ContentflowError, Result};
use crate::monitor::BackoffConfig;
use crate::stages::{AssetKind, StageName};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable overriding `max_concurrent_workers`.
pub const ENV_MAX_CONCURRENT_WORKERS: &str = "CONTENTFLOW_MAX_CONCURRENT_WORKERS";
/// Environment variable overriding `stage_timeout_seconds`.
pub const ENV_STAGE_TIMEOUT_SECONDS: &str = "CONTENTFLOW_STAGE_TIMEOUT_SECONDS";
/// Environment variable overriding `max_retries`.
pub const ENV_MAX_RETRIES: &str = "CONTENTFLOW_MAX_RETRIES";
/// Environment variable overriding `max_batch_size`.
pub const ENV_MAX_BATCH_SIZE: &str = "CONTENTFLOW_MAX_BATCH_SIZE";

/// Resource budget shared by the monitor and the orchestrators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBudget {
    /// Admission slots: operations allowed in flight at once.
    #[serde(default = "default_max_concurrent_workers")]
    pub max_concurrent_workers: usize,
    /// Per-attempt timeout in seconds.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_seconds: f64,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Largest batch accepted by the batch orchestrator.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Delay policy between attempts.
    #[serde(default)]
    pub backoff: BackoffConfig,
    /// Slow-operation thresholds used when recording metrics.
    #[serde(default)]
    pub monitoring: MonitoringThresholds,
    /// Which assets the asset stage accepts.
    #[serde(default)]
    pub assets: AssetPolicy,
    /// Per-stage timeout/retry overrides.
    #[serde(default)]
    pub stages: HashMap<StageName, StagePolicy>,
}

fn default_max_concurrent_workers() -> usize {
    4
}

fn default_stage_timeout() -> f64 {
    300.0
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_batch_size() -> usize {
    50
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            max_concurrent_workers: default_max_concurrent_workers(),
            stage_timeout_seconds: default_stage_timeout(),
            max_retries: default_max_retries(),
            max_batch_size: default_max_batch_size(),
            backoff: BackoffConfig::default(),
            monitoring: MonitoringThresholds::default(),
            assets: AssetPolicy::default(),
            stages: HashMap::new(),
        }
    }
}

impl ResourceBudget {
    /// Creates a budget with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of admission slots.
    #[must_use]
    pub fn with_max_concurrent_workers(mut self, workers: usize) -> Self {
        self.max_concurrent_workers = workers;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout_seconds = timeout.as_secs_f64();
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the batch admission limit.
    #[must_use]
    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    /// Sets the backoff policy.
    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Sets the monitoring thresholds.
    #[must_use]
    pub fn with_monitoring(mut self, monitoring: MonitoringThresholds) -> Self {
        self.monitoring = monitoring;
        self
    }

    /// Sets the asset policy.
    #[must_use]
    pub fn with_asset_policy(mut self, assets: AssetPolicy) -> Self {
        self.assets = assets;
        self
    }

    /// Overrides timeout/retry for one stage.
    #[must_use]
    pub fn with_stage_policy(mut self, stage: StageName, policy: StagePolicy) -> Self {
        self.stages.insert(stage, policy);
        self
    }

    /// Default per-attempt timeout as a `Duration`.
    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stage_timeout_seconds)
    }

    /// Effective timeout for a stage, honoring overrides.
    #[must_use]
    pub fn timeout_for(&self, stage: StageName) -> Duration {
        self.stages
            .get(&stage)
            .and_then(|p| p.timeout_seconds)
            .map_or_else(|| self.stage_timeout(), Duration::from_secs_f64)
    }

    /// Effective retry count for a stage, honoring overrides.
    #[must_use]
    pub fn retries_for(&self, stage: StageName) -> u32 {
        self.stages
            .get(&stage)
            .and_then(|p| p.max_retries)
            .unwrap_or(self.max_retries)
    }

    /// Checks the budget for values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_workers == 0 {
            return Err(ContentflowError::Config(
                "max_concurrent_workers must be at least 1".to_string(),
            ));
        }
        if self.max_batch_size == 0 {
            return Err(ContentflowError::Config(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        check_timeout("stage_timeout_seconds", self.stage_timeout_seconds)?;
        for (stage, policy) in &self.stages {
            if let Some(timeout) = policy.timeout_seconds {
                check_timeout(&format!("stages.{stage}.timeout_seconds"), timeout)?;
            }
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return Err(ContentflowError::Config(
                "backoff.max_delay_ms must not be below backoff.base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a budget from a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let budget: Self = serde_json::from_str(json)
            .map_err(|e| ContentflowError::Config(format!("failed to parse budget: {e}")))?;
        budget.validate()?;
        Ok(budget)
    }

    /// Reads and validates a budget from a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ContentflowError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&contents)
    }

    /// Builds a budget from defaults overlaid with `CONTENTFLOW_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::default().overlay_env(|name| std::env::var(name).ok())
    }

    /// Overlays values produced by `lookup` onto this budget.
    ///
    /// `lookup` maps a variable name to its value; it exists so callers and
    /// tests can supply something other than the process environment.
    pub fn overlay_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, ENV_MAX_CONCURRENT_WORKERS)? {
            self.max_concurrent_workers = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_STAGE_TIMEOUT_SECONDS)? {
            self.stage_timeout_seconds = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_RETRIES)? {
            self.max_retries = v;
        }
        if let Some(v) = parse_var(&lookup, ENV_MAX_BATCH_SIZE)? {
            self.max_batch_size = v;
        }
        self.validate()?;
        Ok(self)
    }
}

fn check_timeout(name: &str, seconds: f64) -> Result<()> {
    if seconds > 0.0 && Duration::try_from_secs_f64(seconds).is_ok() {
        Ok(())
    } else {
        Err(ContentflowError::Config(format!(
            "{name} must be a positive number of seconds, got {seconds}"
        )))
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ContentflowError::Config(format!("{name}={raw:?}: {e}"))),
    }
}

/// Timeout/retry override for a single stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePolicy {
    /// Per-attempt timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Retries after the first attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl StagePolicy {
    /// Creates an empty override.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_seconds = Some(timeout.as_secs_f64());
        self
    }

    /// Sets the retry count.
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }
}

/// Durations above which a recorded operation is reported as slow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitoringThresholds {
    /// Logged at info level above this many seconds.
    #[serde(default = "default_performance_threshold")]
    pub performance_threshold_seconds: f64,
    /// Logged at warn level above this many seconds.
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_seconds: f64,
}

fn default_performance_threshold() -> f64 {
    1.0
}

fn default_alert_threshold() -> f64 {
    5.0
}

impl Default for MonitoringThresholds {
    fn default() -> Self {
        Self {
            performance_threshold_seconds: default_performance_threshold(),
            alert_threshold_seconds: default_alert_threshold(),
        }
    }
}

/// Limits applied to assets before they are processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetPolicy {
    /// Largest accepted asset in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Accepted image MIME types.
    #[serde(default = "default_image_types")]
    pub allowed_image_types: Vec<String>,
    /// Accepted audio MIME types.
    #[serde(default = "default_audio_types")]
    pub allowed_audio_types: Vec<String>,
    /// Accepted video MIME types.
    #[serde(default = "default_video_types")]
    pub allowed_video_types: Vec<String>,
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // 100MB
}

fn default_image_types() -> Vec<String> {
    vec!["image/jpeg".to_string(), "image/png".to_string(), "image/gif".to_string()]
}

fn default_audio_types() -> Vec<String> {
    vec!["audio/mpeg".to_string(), "audio/wav".to_string()]
}

fn default_video_types() -> Vec<String> {
    vec!["video/mp4".to_string(), "video/quicktime".to_string()]
}

impl Default for AssetPolicy {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            allowed_image_types: default_image_types(),
            allowed_audio_types: default_audio_types(),
            allowed_video_types: default_video_types(),
        }
    }
}

impl AssetPolicy {
    /// MIME types accepted for an asset kind.
    #[must_use]
    pub fn allowed_types(&self, kind: AssetKind) -> &[String] {
        match kind {
            AssetKind::Image => &self.allowed_image_types,
            AssetKind::Audio => &self.allowed_audio_types,
            AssetKind::Video => &self.allowed_video_types,
        }
    }

    /// Whether an asset of this kind, MIME type and size may be processed.
    #[must_use]
    pub fn accepts(&self, kind: AssetKind, mime_type: &str, size_bytes: u64) -> bool {
        size_bytes <= self.max_file_size
            && self.allowed_types(kind).iter().any(|t| t == mime_type)
    }
}
