//! Event sink trait and implementations.

use super::PipelineEvent;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Receives pipeline events.
///
/// Sinks must not fail the run that emits into them: errors are logged and
/// swallowed by the implementation.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event asynchronously.
    async fn emit(&self, event: &PipelineEvent);

    /// Emits an event without awaiting.
    fn try_emit(&self, event: &PipelineEvent);
}

/// A sink that discards every event.
///
/// Used when no sink is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event: &PipelineEvent) {}

    fn try_emit(&self, _event: &PipelineEvent) {}
}

/// A sink that logs events through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`.
    ///
    /// Only `DEBUG` and `INFO` are distinguished; anything else logs at info.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Creates an info-level logging sink.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }

    fn log_event(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        let data = serde_json::to_string(event).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type, event_data = %data, "Event: {}", event_type);
        } else {
            info!(event_type, event_data = %data, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.log_event(event);
    }

    fn try_emit(&self, event: &PipelineEvent) {
        self.log_event(event);
    }
}

/// A sink that keeps every event, for assertions in tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the collected event types, in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events.read().iter().map(PipelineEvent::event_type).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }

    fn try_emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}
