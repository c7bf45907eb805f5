//! Error types for the contentflow orchestration engine.
//!
//! Every failure the engine surfaces is a [`ContentflowError`]. Callers that
//! only need the classification use [`ContentflowError::kind`], and failures
//! that happened inside a pipeline stage carry the stage name so they can be
//! traced back with [`ContentflowError::failed_stage`].

use crate::stages::StageName;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ContentflowError> = std::result::Result<T, E>;

/// The main error type for contentflow operations.
#[derive(Debug, Error)]
pub enum ContentflowError {
    /// Every attempt of an operation exceeded its deadline.
    #[error("operation '{operation}' timed out after {attempts} attempt(s) of {timeout_ms}ms")]
    Timeout {
        /// Operation name.
        operation: String,
        /// Attempts made, including the first one.
        attempts: u32,
        /// Per-attempt deadline in milliseconds.
        timeout_ms: u64,
    },

    /// Every attempt failed, not all of them by timing out.
    #[error("operation '{operation}' failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Operation name.
        operation: String,
        /// Attempts made, including the first one.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
    },

    /// The work itself failed and no retries were configured.
    #[error("operation '{operation}' failed: {message}")]
    Work {
        /// Operation name.
        operation: String,
        /// Failure message reported by the work.
        message: String,
    },

    /// The request was malformed.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A batch was rejected before any item started.
    #[error("batch of {size} requests exceeds the maximum batch size of {max}")]
    BatchSizeExceeded {
        /// Number of requests submitted.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A pipeline stage failed.
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        /// The failing stage.
        stage: StageName,
        /// What went wrong inside the stage.
        #[source]
        source: Box<ContentflowError>,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`ContentflowError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Deadline exceeded.
    Timeout,
    /// Retries used up.
    RetriesExhausted,
    /// Underlying work failure.
    Work,
    /// Malformed input.
    Validation,
    /// Batch admission rejected.
    BatchSizeExceeded,
    /// Invalid configuration.
    Config,
    /// Internal failure.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::RetriesExhausted => write!(f, "retries_exhausted"),
            Self::Work => write!(f, "work"),
            Self::Validation => write!(f, "validation"),
            Self::BatchSizeExceeded => write!(f, "batch_size_exceeded"),
            Self::Config => write!(f, "config"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

impl ContentflowError {
    /// Wraps an error with the stage it occurred in.
    #[must_use]
    pub fn in_stage(stage: StageName, source: Self) -> Self {
        Self::Stage {
            stage,
            source: Box::new(source),
        }
    }

    /// Returns the classification of this error.
    ///
    /// Stage errors report the kind of the error they wrap.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Self::Work { .. } => ErrorKind::Work,
            Self::Validation(_) => ErrorKind::Validation,
            Self::BatchSizeExceeded { .. } => ErrorKind::BatchSizeExceeded,
            Self::Stage { source, .. } => source.kind(),
            Self::Config(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the stage the error occurred in, if any.
    #[must_use]
    pub fn failed_stage(&self) -> Option<StageName> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns the innermost error, unwrapping stage context.
    #[must_use]
    pub fn root(&self) -> &Self {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("kind".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(stage) = self.failed_stage() {
            map.insert("stage".to_string(), serde_json::json!(stage));
        }

        match self.root() {
            Self::Timeout { attempts, timeout_ms, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("timeout_ms".to_string(), serde_json::json!(timeout_ms));
            }
            Self::RetriesExhausted { attempts, .. } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
            }
            Self::Validation(err) => {
                if let Some(ref field) = err.field {
                    map.insert("field".to_string(), serde_json::json!(field));
                }
            }
            Self::BatchSizeExceeded { size, max } => {
                map.insert("size".to_string(), serde_json::json!(size));
                map.insert("max".to_string(), serde_json::json!(max));
            }
            _ => {}
        }

        map
    }
}

/// Error raised when a request or stage input is malformed.
///
/// Validation errors are never retried: the monitor gives up on the first
/// attempt that returns one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ValidationError {
    /// The offending field, when one can be named.
    pub field: Option<String>,
    /// Human readable description.
    pub message: String,
}

impl ValidationError {
    /// Creates a validation error not tied to a specific field.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            field: None,
            message: message.into(),
        }
    }

    /// Creates a validation error for a named field.
    #[must_use]
    pub fn for_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            message: message.into(),
        }
    }
}
