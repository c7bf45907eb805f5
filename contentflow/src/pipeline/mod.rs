//! Pipeline and batch orchestration.
//!
//! This module provides:
//! - [`PipelineOrchestrator`]: one request through every stage, in order
//! - [`BatchOrchestrator`]: many requests at once with per-item outcomes

mod batch;
mod orchestrator;

#[cfg(test)]
mod integration_tests;

pub use batch::{BatchItemOutcome, BatchOrchestrator, BatchResult, BATCH_OPERATION};
pub use orchestrator::{PipelineOrchestrator, PipelineState, PIPELINE_OPERATION};
