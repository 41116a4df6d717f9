//! Run lifecycle event bus — trait for emitting journey execution events.
//!
//! The engine accepts an `Arc<dyn EventSink>` and emits one event per run
//! transition and per node entered, so audit trails and tests can follow a
//! run's path without reading the store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyEventType {
    RunStarted,
    RunResumed,
    NodeEntered,
    RunCompleted,
    RunFailed,
    RunCancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JourneyEvent {
    pub event_id: Uuid,
    pub event_type: JourneyEventType,
    pub run_id: Uuid,
    pub journey_id: Uuid,
    pub node_id: Option<String>,
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for emitting run lifecycle events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JourneyEvent);
}

/// No-op sink for modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: JourneyEvent) {}
}

/// Writes every event to the tracing pipeline.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: JourneyEvent) {
        info!(
            event = ?event.event_type,
            run_id = %event.run_id,
            journey_id = %event.journey_id,
            node_id = event.node_id.as_deref().unwrap_or("-"),
            detail = event.detail.as_deref().unwrap_or(""),
            "Journey event"
        );
    }
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<JourneyEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<JourneyEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn count_type(&self, event_type: JourneyEventType) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Node ids entered by a run, in order.
    pub fn node_path(&self, run_id: Uuid) -> Vec<String> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.run_id == run_id && e.event_type == JourneyEventType::NodeEntered)
            .filter_map(|e| e.node_id.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: JourneyEvent) {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).push(event);
    }
}

/// Convenience builder for creating a `JourneyEvent` with minimal boilerplate.
pub fn make_event(
    event_type: JourneyEventType,
    run_id: Uuid,
    journey_id: Uuid,
    node_id: Option<String>,
) -> JourneyEvent {
    JourneyEvent {
        event_id: Uuid::new_v4(),
        event_type,
        run_id,
        journey_id,
        node_id,
        detail: None,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
