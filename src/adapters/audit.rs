//! Audit sinks for classification events.

use std::sync::Mutex;

use crate::domain::ClassificationEvent;
use crate::ports::AuditSink;

/// Emits each event as a structured `tracing` record under the
/// `vitalseal::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record_classification(&self, event: &ClassificationEvent) {
        tracing::info!(
            target: "vitalseal::audit",
            schema_version = %event.schema_version,
            accepted_identifiers = event.accepted_identifiers,
            accepted_clinical = event.accepted_clinical,
            discarded = event.discarded.len(),
            discarded_fields = ?event.discarded,
            observed_at = %event.observed_at.to_rfc3339(),
            "record classified"
        );
    }
}

/// Keeps events in memory. The pipeline binary pairs it with
/// [`TracingAuditSink`] to build its audit summary.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<ClassificationEvent>>,
}

impl MemoryAuditSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<ClassificationEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Total number of discarded fields across all events.
    #[must_use]
    pub fn total_discarded(&self) -> usize {
        self.events().iter().map(|e| e.discarded.len()).sum()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record_classification(&self, event: &ClassificationEvent) {
        let mut events = match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        };
        events.push(event.clone());
    }
}
