//! Testing utilities for contentflow pipelines.
//!
//! This module provides:
//! - Stub generators with configurable latency and failures
//! - A probe for measuring peak concurrency

mod probe;
mod stubs;

pub use probe::{ConcurrencyProbe, ProbeGuard};
pub use stubs::{StubAssetProcessor, StubBehavior, StubScriptGenerator, StubVoiceoverGenerator};
