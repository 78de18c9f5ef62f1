// ABOUTME: One-way activity/audit sink for structured sandbox events
// ABOUTME: Tracing-backed sink for production and an in-memory sink for inspection

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// Write-only destination for structured activity events
pub trait AuditSink: Send + Sync {
    fn record(&self, event_type: &str, details: Value);
}

/// Emits every event as a structured log line on the `warden::audit` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event_type: &str, details: Value) {
        info!(
            target: "warden::audit",
            event_type = event_type,
            timestamp = %Utc::now().to_rfc3339(),
            details = %details,
            "{}",
            event_type
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Keeps events in arrival order
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.event_type == event_type).count())
            .unwrap_or(0)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event_type: &str, details: Value) {
        // A poisoned lock means a panic elsewhere while recording; keep appending anyway
        let mut events = match self.events.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(AuditEvent {
            event_type: event_type.to_string(),
            details,
            timestamp: Utc::now(),
        });
    }
}
