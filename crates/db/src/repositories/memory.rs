use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use noticeboard_core::domain::approval::{ApprovalRecord, ApprovalStatus, RecordId};
use noticeboard_core::domain::event::{EventChannel, OutboxEntry, OutboxEventId};
use noticeboard_core::domain::notice::{NoticeId, UserId};
use noticeboard_core::domain::notification::{Notification, NotificationId};
use noticeboard_core::domain::signature::{SignatureBlob, SignatureRef};

use super::{
    ApprovalRecordRepository, CasOutcome, NotificationRepository, OutboxRepository,
    RepositoryError, SignatureRepository,
};

#[derive(Default)]
struct StoreState {
    /// Insertion order stands in for `rowid`.
    records: Vec<ApprovalRecord>,
    outbox: Vec<OutboxEntry>,
    signatures: HashMap<SignatureRef, SignatureBlob>,
}

impl StoreState {
    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|record| &record.id == id)
    }

    fn signature_taken(&self, record: &ApprovalRecord) -> bool {
        record.steps.iter().filter_map(|step| step.signature_ref.as_ref()).any(|signature| {
            self.records.iter().filter(|other| other.id != record.id).any(|other| {
                other.steps.iter().any(|step| step.signature_ref.as_ref() == Some(signature))
            })
        })
    }
}

/// Records, their outbox and captured signatures behind one lock, so a
/// record write and its outbox entries land together.
#[derive(Default)]
pub struct InMemoryApprovalStore {
    state: RwLock<StoreState>,
}

fn oldest_first(records: &mut [ApprovalRecord]) {
    // Stable sort keeps insertion order for equal timestamps.
    records.sort_by_key(|record| record.created_at);
}

#[async_trait::async_trait]
impl ApprovalRecordRepository for InMemoryApprovalStore {
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.records.iter().find(|record| &record.id == id).cloned())
    }

    async fn find_latest_for_notice(
        &self,
        notice_id: &NoticeId,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        Ok(self.list_for_notice(notice_id).await?.pop())
    }

    async fn list_for_notice(
        &self,
        notice_id: &NoticeId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let state = self.state.read().await;
        let mut records: Vec<_> =
            state.records.iter().filter(|record| &record.notice_id == notice_id).cloned().collect();
        oldest_first(&mut records);
        Ok(records)
    }

    async fn list_pending_for_approver(
        &self,
        approver_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let state = self.state.read().await;
        let mut records: Vec<_> = state
            .records
            .iter()
            .filter(|record| record.active_approver() == Some(approver_id))
            .cloned()
            .collect();
        oldest_first(&mut records);
        records.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(records)
    }

    async fn insert(
        &self,
        record: &ApprovalRecord,
        events: &[OutboxEntry],
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.position(&record.id).is_some() {
            return Err(RepositoryError::Conflict(format!("record `{}` already exists", record.id)));
        }
        let pending_exists = state.records.iter().any(|existing| {
            existing.notice_id == record.notice_id
                && existing.overall_status == ApprovalStatus::Pending
        });
        if pending_exists && record.overall_status == ApprovalStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "notice `{}` already has a pending approval record",
                record.notice_id
            )));
        }

        state.records.push(record.clone());
        state.outbox.extend_from_slice(events);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
        events: &[OutboxEntry],
    ) -> Result<CasOutcome, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(index) = state.position(&record.id) else {
            return Ok(CasOutcome::Stale);
        };
        if state.records[index].version != expected_version {
            return Ok(CasOutcome::Stale);
        }
        if state.signature_taken(record) {
            return Err(RepositoryError::Conflict(
                "signature is already attached to another step".to_owned(),
            ));
        }

        state.records[index] = record.clone();
        state.outbox.extend_from_slice(events);
        Ok(CasOutcome::Applied)
    }

    async fn count_by_status(&self) -> Result<Vec<(ApprovalStatus, u64)>, RepositoryError> {
        let state = self.state.read().await;
        let mut counts: Vec<(ApprovalStatus, u64)> = Vec::new();
        for record in &state.records {
            match counts.iter_mut().find(|(status, _)| *status == record.overall_status) {
                Some((_, count)) => *count += 1,
                None => counts.push((record.overall_status, 1)),
            }
        }
        counts.sort_by_key(|(status, _)| status.as_str());
        Ok(counts)
    }
}

#[async_trait::async_trait]
impl OutboxRepository for InMemoryApprovalStore {
    async fn find(&self, id: &OutboxEventId) -> Result<Option<OutboxEntry>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.outbox.iter().find(|entry| &entry.id == id).cloned())
    }

    async fn list_undelivered(
        &self,
        channel: Option<EventChannel>,
        limit: u32,
    ) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .outbox
            .iter()
            .filter(|entry| !entry.is_delivered())
            .filter(|entry| channel.map_or(true, |channel| entry.channel() == channel))
            .cloned()
            .collect();
        entries.sort_by_key(|entry| (entry.attempts, entry.created_at));
        entries.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(entries)
    }

    async fn list_for_record(
        &self,
        record_id: &RecordId,
    ) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .outbox
            .iter()
            .filter(|entry| entry.event.record_id() == record_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.created_at);
        Ok(entries)
    }

    async fn mark_delivered(
        &self,
        id: &OutboxEventId,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let Some(entry) =
            state.outbox.iter_mut().find(|entry| &entry.id == id && !entry.is_delivered())
        else {
            return Ok(false);
        };
        entry.delivered_at = Some(delivered_at);
        entry.attempts += 1;
        entry.last_error = None;
        Ok(true)
    }

    async fn record_failure(&self, id: &OutboxEventId, error: &str) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if let Some(entry) =
            state.outbox.iter_mut().find(|entry| &entry.id == id && !entry.is_delivered())
        {
            entry.attempts += 1;
            entry.last_error = Some(error.to_owned());
        }
        Ok(())
    }

    async fn count_undelivered(&self) -> Result<u64, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.outbox.iter().filter(|entry| !entry.is_delivered()).count() as u64)
    }
}

#[async_trait::async_trait]
impl SignatureRepository for InMemoryApprovalStore {
    async fn insert(&self, blob: &SignatureBlob) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        if state.signatures.contains_key(&blob.signature_ref) {
            return Err(RepositoryError::Conflict(format!(
                "signature `{}` already exists",
                blob.signature_ref
            )));
        }
        state.signatures.insert(blob.signature_ref.clone(), blob.clone());
        Ok(())
    }

    async fn find(
        &self,
        signature_ref: &SignatureRef,
    ) -> Result<Option<SignatureBlob>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state.signatures.get(signature_ref).cloned())
    }

    async fn find_binding(
        &self,
        signature_ref: &SignatureRef,
    ) -> Result<Option<RecordId>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .records
            .iter()
            .find(|record| {
                record.steps.iter().any(|step| step.signature_ref.as_ref() == Some(signature_ref))
            })
            .map(|record| record.id.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryNotificationRepository {
    notifications: RwLock<Vec<Notification>>,
}

#[async_trait::async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert_if_absent(&self, notification: &Notification) -> Result<bool, RepositoryError> {
        let mut notifications = self.notifications.write().await;
        let duplicate = notification.source_event.is_some()
            && notifications.iter().any(|existing| existing.source_event == notification.source_event);
        if duplicate || notifications.iter().any(|existing| existing.id == notification.id) {
            return Ok(false);
        }
        notifications.push(notification.clone());
        Ok(true)
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let notifications = self.notifications.read().await;
        let mut inbox: Vec<_> = notifications
            .iter()
            .rev()
            .filter(|notification| &notification.user_id == user_id)
            .cloned()
            .collect();
        // Reversed insertion order breaks ties between equal timestamps.
        inbox.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        inbox.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(inbox)
    }

    async fn count_unread(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|notification| &notification.user_id == user_id && !notification.is_read)
            .count() as u64)
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let mut notifications = self.notifications.write().await;
        match notifications
            .iter_mut()
            .find(|notification| &notification.id == id && &notification.user_id == user_id)
        {
            Some(notification) => {
                notification.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let mut notifications = self.notifications.write().await;
        let mut changed = 0;
        for notification in notifications
            .iter_mut()
            .filter(|notification| &notification.user_id == user_id && !notification.is_read)
        {
            notification.is_read = true;
            changed += 1;
        }
        Ok(changed)
    }
}
