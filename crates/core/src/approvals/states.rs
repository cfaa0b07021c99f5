use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalRecord;
use crate::domain::event::ApprovalEvent;
use crate::domain::notice::{NoticeId, UserId};
use crate::domain::signature::SignatureRef;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub notice_id: NoticeId,
    /// Chain order is exactly this order.
    pub approver_ids: Vec<UserId>,
    pub requested_by: UserId,
}

/// A mutation against an existing record. Only the engine turns these into
/// a new record state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalCommand {
    Approve {
        actor_id: UserId,
        comments: Option<String>,
        signature_ref: Option<SignatureRef>,
    },
    Reject {
        actor_id: UserId,
        reason: String,
    },
    Withdraw {
        actor_id: UserId,
        reason: String,
        /// Set when the caller presented a valid admin credential.
        admin_override: bool,
    },
}

impl ApprovalCommand {
    pub fn actor_id(&self) -> &UserId {
        match self {
            Self::Approve { actor_id, .. }
            | Self::Reject { actor_id, .. }
            | Self::Withdraw { actor_id, .. } => actor_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
            Self::Withdraw { .. } => "withdraw",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Requested,
    Advanced,
    Completed,
    Rejected,
    Withdrawn,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Advanced => "advanced",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub kind: TransitionKind,
    pub record: ApprovalRecord,
    /// Version the store must still hold for this outcome to apply. `None`
    /// for a freshly requested record.
    pub expected_version: Option<u32>,
    pub from_index: Option<usize>,
    pub to_index: Option<usize>,
    pub events: Vec<ApprovalEvent>,
}
