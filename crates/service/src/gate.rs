use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use noticeboard_core::directory::Directory;
use noticeboard_core::domain::event::{EventChannel, OutboxEntry, OutboxEventId};
use noticeboard_core::domain::notice::NoticeId;
use noticeboard_core::errors::{ApplicationError, ApprovalError};
use noticeboard_core::gate::{self, GateDecision};
use noticeboard_db::repositories::{ApprovalRecordRepository, OutboxRepository};

pub const DEFAULT_SIGNAL_LIMIT: u32 = 50;
pub const MAX_SIGNAL_LIMIT: u32 = 500;

/// Publish eligibility of notices, plus the pull side of the gate channel
/// for collaborators that do not take webhook pushes.
pub struct NoticeGate {
    records: Arc<dyn ApprovalRecordRepository>,
    outbox: Arc<dyn OutboxRepository>,
    directory: Arc<dyn Directory>,
}

impl NoticeGate {
    pub fn new(
        records: Arc<dyn ApprovalRecordRepository>,
        outbox: Arc<dyn OutboxRepository>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        Self { records, outbox, directory }
    }

    pub async fn is_publishable(&self, notice_id: &NoticeId) -> Result<GateDecision, ApplicationError> {
        let notice = self.directory.find_notice(notice_id).await?;
        let latest = self.records.find_latest_for_notice(notice_id).await?;
        Ok(gate::decide(notice_id, notice.as_ref(), latest.as_ref()))
    }

    /// Undelivered `publish_eligible` / `return_to_draft` signals, oldest
    /// first.
    pub async fn pending_signals(&self, limit: Option<u32>) -> Result<Vec<OutboxEntry>, ApplicationError> {
        let limit = limit.unwrap_or(DEFAULT_SIGNAL_LIMIT).clamp(1, MAX_SIGNAL_LIMIT);
        Ok(self.outbox.list_undelivered(Some(EventChannel::Gate), limit).await?)
    }

    /// Acknowledges a gate signal. Acknowledging twice is harmless; the
    /// return value tells whether this call did it.
    pub async fn acknowledge(
        &self,
        event_id: &OutboxEventId,
        correlation_id: &str,
    ) -> Result<bool, ApplicationError> {
        let entry = self
            .outbox
            .find(event_id)
            .await?
            .ok_or_else(|| ApprovalError::not_found("gate signal", event_id.0.clone()))?;
        if entry.channel() != EventChannel::Gate {
            return Err(ApprovalError::InvalidRequest(format!(
                "event `{event_id}` is not a gate signal"
            ))
            .into());
        }

        let acknowledged = self.outbox.mark_delivered(event_id, Utc::now()).await?;
        info!(
            event_name = "dispatch.gate.acknowledged",
            correlation_id,
            event_id = %event_id,
            record_id = %entry.event.record_id(),
            notice_id = %entry.event.notice_id(),
            kind = entry.event.kind(),
            first_ack = acknowledged,
            "gate signal acknowledged"
        );
        Ok(acknowledged)
    }
}
