use noticeboard_core::audit::{AuditEvent, AuditOutcome, AuditSink};
use tracing::{info, warn};

/// Writes audit events to the `tracing` pipeline. Rejections and failures
/// are logged at `warn`.
#[derive(Clone, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, event: AuditEvent) {
        let notice_id = event.notice_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let record_id = event.record_id.as_ref().map(|id| id.0.as_str()).unwrap_or("unknown");
        let metadata = serde_json::to_string(&event.metadata).unwrap_or_default();

        match event.outcome {
            AuditOutcome::Success => info!(
                event_name = %event.event_type,
                audit_event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                notice_id,
                record_id,
                actor = %event.actor,
                category = ?event.category,
                metadata = %metadata,
                "audit event"
            ),
            AuditOutcome::Rejected | AuditOutcome::Failed => warn!(
                event_name = %event.event_type,
                audit_event_id = %event.event_id,
                correlation_id = %event.correlation_id,
                notice_id,
                record_id,
                actor = %event.actor,
                category = ?event.category,
                outcome = ?event.outcome,
                metadata = %metadata,
                "audit event"
            ),
        }
    }
}
