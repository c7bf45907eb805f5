//! Thread-safe ledger of operation outcomes and durations.

use crate::config::MonitoringThresholds;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let seconds = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
}

/// One recorded observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Operation the observation belongs to.
    pub operation: String,
    /// How long the operation took (serialized as seconds).
    #[serde(serialize_with = "serialize_duration", deserialize_with = "deserialize_duration")]
    pub duration: Duration,
    /// Whether the operation succeeded.
    pub success: bool,
    /// When the observation was recorded.
    pub timestamp: DateTime<Utc>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Aggregate view over one operation's metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSummary {
    /// Operation name.
    pub operation: String,
    /// Number of observations.
    pub count: usize,
    /// Successful observations.
    pub successes: usize,
    /// Failed observations.
    pub failures: usize,
    /// Mean duration in milliseconds.
    pub mean_ms: f64,
    /// Shortest duration in milliseconds.
    pub min_ms: f64,
    /// Longest duration in milliseconds.
    pub max_ms: f64,
}

impl OperationSummary {
    /// Fraction of successful observations, 0.0 when empty.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.successes as f64 / self.count as f64
    }
}

/// Collects metrics from concurrently running operations.
///
/// Recording never fails and never panics: metrics must not break the work
/// they observe.
#[derive(Debug, Default)]
pub struct MetricsCollector {
    metrics: Mutex<HashMap<String, Vec<Metric>>>,
    thresholds: MonitoringThresholds,
}

impl MetricsCollector {
    /// Creates a collector with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a collector with custom slow-operation thresholds.
    #[must_use]
    pub fn with_thresholds(thresholds: MonitoringThresholds) -> Self {
        Self {
            metrics: Mutex::new(HashMap::new()),
            thresholds,
        }
    }

    /// Appends a metric under `operation`.
    pub fn record(
        &self,
        operation: &str,
        duration: Duration,
        success: bool,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        self.report_slow(operation, duration, success);

        let metric = Metric {
            operation: operation.to_string(),
            duration,
            success,
            timestamp: Utc::now(),
            metadata,
        };

        self.metrics
            .lock()
            .entry(operation.to_string())
            .or_default()
            .push(metric);
    }

    /// Appends a metric whose metadata is any serializable value.
    ///
    /// Metadata that does not serialize to a JSON object is logged and
    /// replaced with an empty map; the metric itself is always recorded.
    pub fn record_with<M: Serialize>(
        &self,
        operation: &str,
        duration: Duration,
        success: bool,
        metadata: &M,
    ) {
        let metadata = match serde_json::to_value(metadata) {
            Ok(serde_json::Value::Object(map)) => map.into_iter().collect(),
            Ok(serde_json::Value::Null) => HashMap::new(),
            Ok(other) => {
                warn!(operation, value = %other, "Metric metadata is not an object, dropping it");
                HashMap::new()
            }
            Err(e) => {
                warn!(operation, error = %e, "Failed to serialize metric metadata");
                HashMap::new()
            }
        };
        self.record(operation, duration, success, metadata);
    }

    /// Returns a snapshot of all metrics, or of one operation when given.
    ///
    /// An unknown operation yields an empty map.
    #[must_use]
    pub fn get(&self, operation: Option<&str>) -> HashMap<String, Vec<Metric>> {
        let metrics = self.metrics.lock();
        match operation {
            Some(name) => metrics
                .get(name)
                .map(|list| HashMap::from([(name.to_string(), list.clone())]))
                .unwrap_or_default(),
            None => metrics.clone(),
        }
    }

    /// Returns a snapshot of one operation's metrics.
    #[must_use]
    pub fn operation(&self, name: &str) -> Vec<Metric> {
        self.metrics.lock().get(name).cloned().unwrap_or_default()
    }

    /// Total number of stored metrics across all operations.
    #[must_use]
    pub fn total(&self) -> usize {
        self.metrics.lock().values().map(Vec::len).sum()
    }

    /// Summarizes one operation, or `None` if nothing was recorded for it.
    #[must_use]
    pub fn summary(&self, name: &str) -> Option<OperationSummary> {
        let metrics = self.metrics.lock();
        let list = metrics.get(name).filter(|l| !l.is_empty())?;

        let successes = list.iter().filter(|m| m.success).count();
        let durations: Vec<f64> = list
            .iter()
            .map(|m| m.duration.as_secs_f64() * 1000.0)
            .collect();
        let sum: f64 = durations.iter().sum();

        Some(OperationSummary {
            operation: name.to_string(),
            count: list.len(),
            successes,
            failures: list.len() - successes,
            mean_ms: sum / durations.len() as f64,
            min_ms: durations.iter().copied().fold(f64::INFINITY, f64::min),
            max_ms: durations.iter().copied().fold(0.0, f64::max),
        })
    }

    /// Removes every recorded metric.
    pub fn clear(&self) {
        self.metrics.lock().clear();
    }

    fn report_slow(&self, operation: &str, duration: Duration, success: bool) {
        let seconds = duration.as_secs_f64();
        if seconds > self.thresholds.alert_threshold_seconds {
            warn!(
                operation,
                duration_ms = duration.as_millis() as u64,
                success,
                "Operation exceeded alert threshold"
            );
        } else if seconds > self.thresholds.performance_threshold_seconds {
            info!(
                operation,
                duration_ms = duration.as_millis() as u64,
                success,
                "Slow operation"
            );
        }
    }
}
