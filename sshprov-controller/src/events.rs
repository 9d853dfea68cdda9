//! Lifecycle events.

use std::sync::Mutex;

use sshprov_api::Reason;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

/// A recorded event about a managed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: &'static str,
    pub name: String,
    pub event_kind: EventKind,
    pub reason: Reason,
    pub message: String,
}

/// Sink for object lifecycle events.
pub trait EventRecorder: Send + Sync {
    fn record(
        &self,
        kind: &'static str,
        name: &str,
        event_kind: EventKind,
        reason: Reason,
        message: &str,
    );
}

/// Emits events as log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(
        &self,
        kind: &'static str,
        name: &str,
        event_kind: EventKind,
        reason: Reason,
        message: &str,
    ) {
        match event_kind {
            EventKind::Normal => info!(kind, name, reason = %reason, "{}", message),
            EventKind::Warning => warn!(kind, name, reason = %reason, "{}", message),
        }
    }
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events recorded for one object.
    pub fn events_for(&self, name: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.name == name)
            .collect()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(
        &self,
        kind: &'static str,
        name: &str,
        event_kind: EventKind,
        reason: Reason,
        message: &str,
    ) {
        if let Ok(mut events) = self.events.lock() {
            events.push(RecordedEvent {
                kind,
                name: name.to_string(),
                event_kind,
                reason,
                message: message.to_string(),
            });
        }
    }
}
