use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::approval::{ApprovalStatus, RecordId};
use crate::domain::notice::{NoticeId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxEventId(pub String);

impl OutboxEventId {
    pub fn generate() -> Self {
        Self(format!("EVT-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for OutboxEventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventChannel {
    /// Delivered into a user's notification inbox.
    Notification,
    /// Consumed by the notice store to flip publish state.
    Gate,
}

impl EventChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Gate => "gate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "notification" => Some(Self::Notification),
            "gate" => Some(Self::Gate),
            _ => None,
        }
    }
}

/// Side effects of an accepted transition. Written to the outbox in the same
/// store operation as the record mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApprovalEvent {
    ActionRequired {
        record_id: RecordId,
        notice_id: NoticeId,
        approver_id: UserId,
        position: usize,
        total_steps: usize,
    },
    ChainCompleted {
        record_id: RecordId,
        notice_id: NoticeId,
        author_id: UserId,
    },
    ChainHalted {
        record_id: RecordId,
        notice_id: NoticeId,
        author_id: UserId,
        status: ApprovalStatus,
        reason: Option<String>,
    },
    PublishEligible {
        record_id: RecordId,
        notice_id: NoticeId,
    },
    ReturnToDraft {
        record_id: RecordId,
        notice_id: NoticeId,
        status: ApprovalStatus,
        reason: Option<String>,
    },
}

impl ApprovalEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActionRequired { .. } => "action_required",
            Self::ChainCompleted { .. } => "chain_completed",
            Self::ChainHalted { .. } => "chain_halted",
            Self::PublishEligible { .. } => "publish_eligible",
            Self::ReturnToDraft { .. } => "return_to_draft",
        }
    }

    pub fn channel(&self) -> EventChannel {
        match self {
            Self::ActionRequired { .. } | Self::ChainCompleted { .. } | Self::ChainHalted { .. } => {
                EventChannel::Notification
            }
            Self::PublishEligible { .. } | Self::ReturnToDraft { .. } => EventChannel::Gate,
        }
    }

    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::ActionRequired { record_id, .. }
            | Self::ChainCompleted { record_id, .. }
            | Self::ChainHalted { record_id, .. }
            | Self::PublishEligible { record_id, .. }
            | Self::ReturnToDraft { record_id, .. } => record_id,
        }
    }

    pub fn notice_id(&self) -> &NoticeId {
        match self {
            Self::ActionRequired { notice_id, .. }
            | Self::ChainCompleted { notice_id, .. }
            | Self::ChainHalted { notice_id, .. }
            | Self::PublishEligible { notice_id, .. }
            | Self::ReturnToDraft { notice_id, .. } => notice_id,
        }
    }

    /// The user a notification-channel event is addressed to.
    pub fn recipient(&self) -> Option<&UserId> {
        match self {
            Self::ActionRequired { approver_id, .. } => Some(approver_id),
            Self::ChainCompleted { author_id, .. } | Self::ChainHalted { author_id, .. } => {
                Some(author_id)
            }
            Self::PublishEligible { .. } | Self::ReturnToDraft { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: OutboxEventId,
    pub event: ApprovalEvent,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
}

impl OutboxEntry {
    pub fn new(event: ApprovalEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            id: OutboxEventId::generate(),
            event,
            created_at,
            delivered_at: None,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn channel(&self) -> EventChannel {
        self.event.channel()
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalEvent, EventChannel};
    use crate::domain::approval::{ApprovalStatus, RecordId};
    use crate::domain::notice::{NoticeId, UserId};

    #[test]
    fn events_route_to_expected_channels() {
        let record_id = RecordId("APR-1".to_owned());
        let notice_id = NoticeId("N-1".to_owned());

        let action = ApprovalEvent::ActionRequired {
            record_id: record_id.clone(),
            notice_id: notice_id.clone(),
            approver_id: UserId("emp-2".to_owned()),
            position: 1,
            total_steps: 3,
        };
        let draft = ApprovalEvent::ReturnToDraft {
            record_id,
            notice_id,
            status: ApprovalStatus::Rejected,
            reason: Some("insufficient detail".to_owned()),
        };

        assert_eq!(action.channel(), EventChannel::Notification);
        assert_eq!(action.recipient().map(|id| id.0.as_str()), Some("emp-2"));
        assert_eq!(draft.channel(), EventChannel::Gate);
        assert!(draft.recipient().is_none());
    }

    #[test]
    fn event_payload_is_tagged_by_kind() {
        let event = ApprovalEvent::PublishEligible {
            record_id: RecordId("APR-9".to_owned()),
            notice_id: NoticeId("N-9".to_owned()),
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["kind"], "publish_eligible");
        assert_eq!(json["notice_id"], "N-9");

        let decoded: ApprovalEvent = serde_json::from_value(json).expect("deserialize");
        assert_eq!(decoded.kind(), "publish_eligible");
    }
}
