//! Bounded-concurrency execution of external work.
//!
//! The [`ResourceMonitor`] is the only throttle in the engine: every
//! generator call goes through one of its admission slots, with a per-attempt
//! deadline and a retry policy described by [`BackoffConfig`].

mod backoff;
mod resource;

pub use backoff::{BackoffConfig, BackoffState, BackoffStrategy, JitterStrategy};
pub use resource::{ExecuteOptions, ResourceMonitor};
