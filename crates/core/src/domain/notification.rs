use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalStatus, RecordId};
use crate::domain::event::{ApprovalEvent, OutboxEntry, OutboxEventId};
use crate::domain::notice::{NoticeId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub String);

impl NotificationId {
    pub fn generate() -> Self {
        Self(format!("NTF-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ApprovalRequest,
    ApprovalOutcome,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApprovalRequest => "approval_request",
            Self::ApprovalOutcome => "approval_outcome",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "approval_request" => Some(Self::ApprovalRequest),
            "approval_outcome" => Some(Self::ApprovalOutcome),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub record_id: Option<RecordId>,
    pub notice_id: Option<NoticeId>,
    /// The outbox entry this notification was rendered from. Unique, so a
    /// redelivered event lands in the inbox once.
    pub source_event: Option<OutboxEventId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    /// Renders a notification-channel outbox entry for its recipient.
    /// Gate-channel entries have no recipient and yield `None`.
    pub fn from_outbox(entry: &OutboxEntry, now: DateTime<Utc>) -> Option<Self> {
        let recipient = entry.event.recipient()?.clone();
        let (kind, title, message) = match &entry.event {
            ApprovalEvent::ActionRequired { notice_id, position, total_steps, .. } => (
                NotificationKind::ApprovalRequest,
                "Approval needed".to_owned(),
                format!(
                    "Notice {notice_id} is waiting for your approval (level {} of {total_steps}).",
                    position + 1
                ),
            ),
            ApprovalEvent::ChainCompleted { notice_id, .. } => (
                NotificationKind::ApprovalOutcome,
                "Notice approved".to_owned(),
                format!("Every approver signed off on notice {notice_id}. It can now be published."),
            ),
            ApprovalEvent::ChainHalted { notice_id, status, reason, .. } => {
                let verb = match status {
                    ApprovalStatus::Withdrawn => "was withdrawn from approval",
                    _ => "was rejected",
                };
                let message = match reason {
                    Some(reason) => format!("Notice {notice_id} {verb}: {reason}"),
                    None => format!("Notice {notice_id} {verb}."),
                };
                (NotificationKind::ApprovalOutcome, "Notice returned to draft".to_owned(), message)
            }
            ApprovalEvent::PublishEligible { .. } | ApprovalEvent::ReturnToDraft { .. } => {
                return None;
            }
        };

        Some(Self {
            id: NotificationId::generate(),
            user_id: recipient,
            title,
            message,
            kind,
            record_id: Some(entry.event.record_id().clone()),
            notice_id: Some(entry.event.notice_id().clone()),
            source_event: Some(entry.id.clone()),
            is_read: false,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{Notification, NotificationKind};
    use crate::domain::approval::{ApprovalStatus, RecordId};
    use crate::domain::event::{ApprovalEvent, OutboxEntry};
    use crate::domain::notice::{NoticeId, UserId};

    #[test]
    fn action_required_addresses_the_next_approver() {
        let entry = OutboxEntry::new(
            ApprovalEvent::ActionRequired {
                record_id: RecordId("APR-1".to_owned()),
                notice_id: NoticeId("N-7".to_owned()),
                approver_id: UserId("emp-b".to_owned()),
                position: 1,
                total_steps: 3,
            },
            Utc::now(),
        );

        let notification = Notification::from_outbox(&entry, Utc::now()).expect("rendered");
        assert_eq!(notification.user_id.0, "emp-b");
        assert_eq!(notification.kind, NotificationKind::ApprovalRequest);
        assert!(notification.message.contains("level 2 of 3"));
        assert_eq!(notification.source_event.as_ref(), Some(&entry.id));
    }

    #[test]
    fn halted_chain_carries_reason_to_author() {
        let entry = OutboxEntry::new(
            ApprovalEvent::ChainHalted {
                record_id: RecordId("APR-1".to_owned()),
                notice_id: NoticeId("N-7".to_owned()),
                author_id: UserId("author".to_owned()),
                status: ApprovalStatus::Rejected,
                reason: Some("insufficient detail".to_owned()),
            },
            Utc::now(),
        );

        let notification = Notification::from_outbox(&entry, Utc::now()).expect("rendered");
        assert_eq!(notification.user_id.0, "author");
        assert!(notification.message.contains("insufficient detail"));
    }

    #[test]
    fn gate_events_do_not_render() {
        let entry = OutboxEntry::new(
            ApprovalEvent::PublishEligible {
                record_id: RecordId("APR-1".to_owned()),
                notice_id: NoticeId("N-7".to_owned()),
            },
            Utc::now(),
        );
        assert!(Notification::from_outbox(&entry, Utc::now()).is_none());
    }
}
