use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalRecord, ApprovalStatus, RecordId};
use crate::domain::notice::{NoticeId, NoticeRef};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    NotRequired,
    AwaitingRequest,
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::AwaitingRequest => "awaiting_request",
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

impl From<ApprovalStatus> for GateStatus {
    fn from(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::Pending => Self::Pending,
            ApprovalStatus::Approved => Self::Approved,
            ApprovalStatus::Rejected => Self::Rejected,
            ApprovalStatus::Withdrawn => Self::Withdrawn,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    pub notice_id: NoticeId,
    pub publishable: bool,
    pub approval_status: GateStatus,
    pub record_id: Option<RecordId>,
}

/// Publish eligibility from the latest record for a notice. Only the latest
/// record counts; superseded ones are history.
pub fn decide(
    notice_id: &NoticeId,
    notice: Option<&NoticeRef>,
    latest: Option<&ApprovalRecord>,
) -> GateDecision {
    let Some(record) = latest else {
        let not_required = notice.is_some_and(|notice| !notice.requires_approval);
        return GateDecision {
            notice_id: notice_id.clone(),
            publishable: not_required,
            approval_status: if not_required {
                GateStatus::NotRequired
            } else {
                GateStatus::AwaitingRequest
            },
            record_id: None,
        };
    };

    GateDecision {
        notice_id: notice_id.clone(),
        publishable: record.overall_status == ApprovalStatus::Approved,
        approval_status: record.overall_status.into(),
        record_id: Some(record.id.clone()),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{decide, GateStatus};
    use crate::domain::approval::{ApprovalRecord, ApprovalStatus, ApprovalStep, RecordId};
    use crate::domain::notice::{NoticeId, NoticeRef, UserId};

    fn record(status: ApprovalStatus) -> ApprovalRecord {
        let now = Utc::now();
        ApprovalRecord {
            id: RecordId("APR-1".to_owned()),
            notice_id: NoticeId("N-1".to_owned()),
            requested_by: UserId("author".to_owned()),
            steps: vec![ApprovalStep::pending(UserId("a".to_owned()))],
            current_index: Some(0),
            overall_status: status,
            version: 1,
            supersedes: None,
            terminal_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn only_an_approved_latest_record_is_publishable() {
        let notice_id = NoticeId("N-1".to_owned());
        for (status, publishable) in [
            (ApprovalStatus::Pending, false),
            (ApprovalStatus::Approved, true),
            (ApprovalStatus::Rejected, false),
            (ApprovalStatus::Withdrawn, false),
        ] {
            let decision = decide(&notice_id, None, Some(&record(status)));
            assert_eq!(decision.publishable, publishable, "status {status}");
            assert_eq!(decision.approval_status.as_str(), status.as_str());
            assert_eq!(decision.record_id.as_ref().map(|id| id.0.as_str()), Some("APR-1"));
        }
    }

    #[test]
    fn notice_without_approval_requirement_is_publishable() {
        let notice_id = NoticeId("N-2".to_owned());
        let notice =
            NoticeRef { notice_id: notice_id.clone(), author_id: None, requires_approval: false };

        let decision = decide(&notice_id, Some(&notice), None);
        assert!(decision.publishable);
        assert_eq!(decision.approval_status, GateStatus::NotRequired);
    }

    #[test]
    fn unknown_or_unrequested_notice_waits_for_a_request() {
        let notice_id = NoticeId("N-3".to_owned());
        let decision = decide(&notice_id, None, None);
        assert!(!decision.publishable);
        assert_eq!(decision.approval_status, GateStatus::AwaitingRequest);

        let notice =
            NoticeRef { notice_id: notice_id.clone(), author_id: None, requires_approval: true };
        let decision = decide(&notice_id, Some(&notice), None);
        assert_eq!(decision.approval_status, GateStatus::AwaitingRequest);
    }
}
