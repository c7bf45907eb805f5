//! # Contentflow
//!
//! Resource-monitored orchestration of content generation pipelines.
//!
//! A content request goes through three stages in a fixed order: script
//! generation, voiceover synthesis and asset processing. Contentflow provides:
//!
//! - **Bounded concurrency**: every generator call takes one of a fixed number
//!   of admission slots
//! - **Timeouts and retries**: per-attempt deadlines with backoff, configurable
//!   per stage
//! - **Batch isolation**: many requests at once, with per-item outcomes
//! - **Metrics and events**: one metric per monitored call and typed lifecycle
//!   events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contentflow::prelude::*;
//! use std::sync::Arc;
//!
//! let monitor = Arc::new(ResourceMonitor::new(ResourceBudget::from_env()?)?);
//! let pipeline = Arc::new(PipelineOrchestrator::new(
//!     monitor,
//!     Arc::new(MyScriptGenerator::new()),
//!     Arc::new(MyVoiceoverGenerator::new()),
//!     Arc::new(MyAssetProcessor::new()),
//! ));
//!
//! let context = pipeline
//!     .run(PipelineRequest::new("explainer", "How tides work"))
//!     .await?;
//!
//! let batch = BatchOrchestrator::new(pipeline)
//!     .run_batch(vec![PipelineRequest::new("short", "One"), PipelineRequest::new("short", "Two")])
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

pub mod config;
pub mod errors;
pub mod events;
pub mod generators;
pub mod metrics;
pub mod monitor;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{AssetPolicy, MonitoringThresholds, ResourceBudget, StagePolicy};
    pub use crate::errors::{ContentflowError, ErrorKind, Result, ValidationError};
    pub use crate::events::{
        CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent,
    };
    pub use crate::generators::{
        AssetProcessor, GeneratedScript, GeneratedVoiceover, ProcessedAsset, ScriptGenerator,
        ScriptMetrics, VoiceMetrics, VoiceoverGenerator,
    };
    pub use crate::metrics::{Metric, MetricsCollector, OperationSummary};
    pub use crate::monitor::{BackoffConfig, BackoffStrategy, ExecuteOptions, JitterStrategy, ResourceMonitor};
    pub use crate::observability::{init_tracing, LogFormat, SpanTimer};
    pub use crate::pipeline::{
        BatchItemOutcome, BatchOrchestrator, BatchResult, PipelineOrchestrator, PipelineState,
    };
    pub use crate::stages::{
        AssetDescriptor, AssetKind, PipelineContext, PipelineRequest, Stage, StageData,
        StageExecutor, StageName, StageOutcome,
    };
}
