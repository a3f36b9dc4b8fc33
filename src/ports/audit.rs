//! Audit port: where classification counts go.
//!
//! The orchestrator emits one event per record and never persists anything
//! itself; storage of the audit trail belongs to the host application.

use crate::domain::ClassificationEvent;

/// Receiver of classification events.
pub trait AuditSink: Send + Sync {
    /// Record one classification outcome. Must not fail the caller.
    fn record_classification(&self, event: &ClassificationEvent);
}

impl<T: AuditSink + ?Sized> AuditSink for std::sync::Arc<T> {
    fn record_classification(&self, event: &ClassificationEvent) {
        (**self).record_classification(event);
    }
}

/// Fan-out: every event goes to both sinks, first `A` then `B`.
impl<A: AuditSink, B: AuditSink> AuditSink for (A, B) {
    fn record_classification(&self, event: &ClassificationEvent) {
        self.0.record_classification(event);
        self.1.record_classification(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::audit::MemoryAuditSink;
    use crate::domain::ClassifiedRecord;
    use std::sync::Arc;

    #[test]
    fn test_pair_reaches_both_sinks() {
        let first = Arc::new(MemoryAuditSink::new());
        let second = Arc::new(MemoryAuditSink::new());
        let pair = (Arc::clone(&first), Arc::clone(&second));

        let event = ClassificationEvent::from_classified("v1", &ClassifiedRecord::default());
        pair.record_classification(&event);
        pair.record_classification(&event);

        assert_eq!(first.events().len(), 2);
        assert_eq!(second.events().len(), 2);
    }
}
