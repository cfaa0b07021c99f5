use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::notice::{NoticeId, UserId};
use crate::domain::signature::SignatureRef;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn generate() -> Self {
        Self(format!("APR-{}", Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Approved,
    Rejected,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Withdrawn,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Withdrawn => "withdrawn",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "withdrawn" => Some(Self::Withdrawn),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a step sits relative to the chain cursor. Derived, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPosition {
    Decided,
    Active,
    NotYetReached,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub approver_id: UserId,
    pub status: StepStatus,
    pub comments: Option<String>,
    pub signature_ref: Option<SignatureRef>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalStep {
    pub fn pending(approver_id: UserId) -> Self {
        Self {
            approver_id,
            status: StepStatus::Pending,
            comments: None,
            signature_ref: None,
            decided_at: None,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.status == StepStatus::Approved && self.signature_ref.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: RecordId,
    pub notice_id: NoticeId,
    pub requested_by: UserId,
    pub steps: Vec<ApprovalStep>,
    /// `None` once the chain has completed. Frozen at the deciding step on
    /// rejection or withdrawal.
    pub current_index: Option<usize>,
    pub overall_status: ApprovalStatus,
    pub version: u32,
    pub supersedes: Option<RecordId>,
    pub terminal_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn is_terminal(&self) -> bool {
        self.overall_status.is_terminal()
    }

    /// The step awaiting action, only while the chain is pending.
    pub fn active_step(&self) -> Option<&ApprovalStep> {
        if self.overall_status != ApprovalStatus::Pending {
            return None;
        }
        self.current_index.and_then(|index| self.steps.get(index))
    }

    pub fn active_approver(&self) -> Option<&UserId> {
        self.active_step().map(|step| &step.approver_id)
    }

    pub fn position_of(&self, index: usize) -> StepPosition {
        let Some(step) = self.steps.get(index) else {
            return StepPosition::Skipped;
        };
        if step.status != StepStatus::Pending {
            return StepPosition::Decided;
        }
        if self.overall_status != ApprovalStatus::Pending {
            return StepPosition::Skipped;
        }
        match self.current_index {
            Some(current) if current == index => StepPosition::Active,
            Some(current) if index > current => StepPosition::NotYetReached,
            _ => StepPosition::Skipped,
        }
    }

    pub fn approved_count(&self) -> usize {
        self.steps.iter().filter(|step| step.status == StepStatus::Approved).count()
    }

    pub fn snapshot(&self) -> ApprovalSnapshot {
        ApprovalSnapshot::from(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSnapshot {
    pub position: usize,
    pub approver_id: UserId,
    pub status: StepStatus,
    pub state: StepPosition,
    pub comments: Option<String>,
    pub signature_ref: Option<SignatureRef>,
    pub signed: bool,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Read model handed to every caller. Clients render this instead of
/// deriving turn order themselves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    pub record_id: RecordId,
    pub notice_id: NoticeId,
    pub requested_by: UserId,
    pub overall_status: ApprovalStatus,
    pub current_index: Option<usize>,
    pub active_approver: Option<UserId>,
    pub total_steps: usize,
    pub approved_steps: usize,
    pub version: u32,
    pub supersedes: Option<RecordId>,
    pub terminal_reason: Option<String>,
    pub steps: Vec<StepSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ApprovalRecord> for ApprovalSnapshot {
    fn from(record: &ApprovalRecord) -> Self {
        let steps = record
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| StepSnapshot {
                position: index,
                approver_id: step.approver_id.clone(),
                status: step.status,
                state: record.position_of(index),
                comments: step.comments.clone(),
                signature_ref: step.signature_ref.clone(),
                signed: step.is_signed(),
                decided_at: step.decided_at,
            })
            .collect();

        Self {
            record_id: record.id.clone(),
            notice_id: record.notice_id.clone(),
            requested_by: record.requested_by.clone(),
            overall_status: record.overall_status,
            current_index: record.current_index,
            active_approver: record.active_approver().cloned(),
            total_steps: record.steps.len(),
            approved_steps: record.approved_count(),
            version: record.version,
            supersedes: record.supersedes.clone(),
            terminal_reason: record.terminal_reason.clone(),
            steps,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}
