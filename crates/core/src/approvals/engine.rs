use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::approvals::states::{ApprovalCommand, ApprovalRequest, TransitionKind, TransitionOutcome};
use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::approval::{ApprovalRecord, ApprovalStatus, ApprovalStep, RecordId, StepStatus};
use crate::domain::event::ApprovalEvent;
use crate::domain::notice::UserId;
use crate::domain::signature::SignatureRef;
use crate::errors::ApprovalError;

pub const DEFAULT_MAX_APPROVERS: usize = 20;
pub const MAX_COMMENT_CHARS: usize = 2_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalPolicy {
    pub max_approvers: usize,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self { max_approvers: DEFAULT_MAX_APPROVERS }
    }
}

/// The linear approval state machine. Pure: it never touches storage and
/// never mutates the record it is given, so a failed transition leaves the
/// stored state exactly as it was.
#[derive(Clone, Debug, Default)]
pub struct ApprovalEngine {
    policy: ApprovalPolicy,
}

impl ApprovalEngine {
    pub fn new(policy: ApprovalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ApprovalPolicy {
        &self.policy
    }

    /// Opens a new chain. `latest` is the most recent record for the same
    /// notice, if any; a pending one blocks the request and a terminal one is
    /// superseded.
    pub fn request(
        &self,
        request: &ApprovalRequest,
        latest: Option<&ApprovalRecord>,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        if request.notice_id.0.trim().is_empty() {
            return Err(ApprovalError::InvalidRequest("notice_id must not be blank".to_owned()));
        }
        if request.requested_by.0.trim().is_empty() {
            return Err(ApprovalError::InvalidRequest("requested_by must not be blank".to_owned()));
        }
        let approver_ids = normalize_approvers(&request.approver_ids, self.policy.max_approvers)?;

        if let Some(latest) = latest {
            if latest.notice_id != request.notice_id {
                return Err(ApprovalError::InvariantViolation(format!(
                    "record `{}` belongs to notice `{}`, not `{}`",
                    latest.id, latest.notice_id, request.notice_id
                )));
            }
            if !latest.is_terminal() {
                return Err(ApprovalError::AlreadyPending {
                    notice_id: request.notice_id.clone(),
                    record_id: Some(latest.id.clone()),
                });
            }
        }

        let record = ApprovalRecord {
            id: RecordId::generate(),
            notice_id: request.notice_id.clone(),
            requested_by: request.requested_by.clone(),
            steps: approver_ids.into_iter().map(ApprovalStep::pending).collect(),
            current_index: Some(0),
            overall_status: ApprovalStatus::Pending,
            version: 1,
            supersedes: latest.map(|previous| previous.id.clone()),
            terminal_reason: None,
            created_at: now,
            updated_at: now,
        };
        let events = vec![action_required(&record, 0)?];

        Ok(TransitionOutcome {
            kind: TransitionKind::Requested,
            record,
            expected_version: None,
            from_index: None,
            to_index: Some(0),
            events,
        })
    }

    pub fn apply(
        &self,
        record: &ApprovalRecord,
        command: &ApprovalCommand,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome, ApprovalError> {
        verify_record(record)?;
        if record.is_terminal() {
            return Err(ApprovalError::AlreadyDecided {
                record_id: record.id.clone(),
                status: record.overall_status,
            });
        }

        match command {
            ApprovalCommand::Approve { actor_id, comments, signature_ref } => {
                approve(record, actor_id, comments.as_deref(), signature_ref.clone(), now)
            }
            ApprovalCommand::Reject { actor_id, reason } => reject(record, actor_id, reason, now),
            ApprovalCommand::Withdraw { actor_id, reason, admin_override } => {
                withdraw(record, actor_id, reason, *admin_override, now)
            }
        }
    }

    pub fn request_with_audit<S>(
        &self,
        request: &ApprovalRequest,
        latest: Option<&ApprovalRecord>,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, ApprovalError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.request(request, latest, now);
        emit_audit(sink, audit, "request", &result);
        result
    }

    pub fn apply_with_audit<S>(
        &self,
        record: &ApprovalRecord,
        command: &ApprovalCommand,
        now: DateTime<Utc>,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, ApprovalError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(record, command, now);
        emit_audit(sink, audit, command.name(), &result);
        result
    }
}

/// Checks the structural invariants of a stored record: every step before
/// the cursor approved, the cursor step matching the overall status, every
/// step after it untouched.
pub fn verify_record(record: &ApprovalRecord) -> Result<(), ApprovalError> {
    let violation = |detail: &str| {
        Err(ApprovalError::InvariantViolation(format!("record `{}` {detail}", record.id)))
    };

    if record.steps.is_empty() {
        return violation("has no steps");
    }

    let len = record.steps.len();
    let (cursor, cursor_status) = match (record.overall_status, record.current_index) {
        (ApprovalStatus::Approved, None) => (len, None),
        (ApprovalStatus::Approved, Some(_)) => return violation("is approved but has a cursor"),
        (_, None) => return violation("is not approved but has no cursor"),
        (_, Some(index)) if index >= len => return violation("has a cursor past its last step"),
        (ApprovalStatus::Rejected, Some(index)) => (index, Some(StepStatus::Rejected)),
        (ApprovalStatus::Pending | ApprovalStatus::Withdrawn, Some(index)) => {
            (index, Some(StepStatus::Pending))
        }
    };

    for (index, step) in record.steps.iter().enumerate() {
        let expected = match index.cmp(&cursor) {
            std::cmp::Ordering::Less => StepStatus::Approved,
            std::cmp::Ordering::Equal => cursor_status.unwrap_or(StepStatus::Approved),
            std::cmp::Ordering::Greater => StepStatus::Pending,
        };
        if step.status != expected {
            return violation(&format!(
                "step {index} is {} where {} was expected",
                step.status.as_str(),
                expected.as_str()
            ));
        }
        if (step.status == StepStatus::Pending) == step.decided_at.is_some() {
            return violation(&format!("step {index} has an inconsistent decision time"));
        }
    }

    Ok(())
}

fn approve(
    record: &ApprovalRecord,
    actor_id: &UserId,
    comments: Option<&str>,
    signature_ref: Option<SignatureRef>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, ApprovalError> {
    let index = ensure_turn(record, actor_id)?;
    let comments = normalize_comments(comments)?;

    let mut next = record.clone();
    let step = step_mut(&mut next, index)?;
    step.status = StepStatus::Approved;
    step.comments = comments;
    step.signature_ref = signature_ref;
    step.decided_at = Some(now);

    let is_last = index + 1 == next.steps.len();
    let (kind, events) = if is_last {
        next.current_index = None;
        next.overall_status = ApprovalStatus::Approved;
        let events = vec![
            ApprovalEvent::PublishEligible {
                record_id: next.id.clone(),
                notice_id: next.notice_id.clone(),
            },
            ApprovalEvent::ChainCompleted {
                record_id: next.id.clone(),
                notice_id: next.notice_id.clone(),
                author_id: next.requested_by.clone(),
            },
        ];
        (TransitionKind::Completed, events)
    } else {
        next.current_index = Some(index + 1);
        (TransitionKind::Advanced, vec![action_required(&next, index + 1)?])
    };

    Ok(finish(record, next, kind, events, now))
}

fn reject(
    record: &ApprovalRecord,
    actor_id: &UserId,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, ApprovalError> {
    let index = ensure_turn(record, actor_id)?;
    let reason = required_reason(reason)?;

    let mut next = record.clone();
    let step = step_mut(&mut next, index)?;
    step.status = StepStatus::Rejected;
    step.comments = Some(reason.clone());
    step.decided_at = Some(now);
    next.overall_status = ApprovalStatus::Rejected;

    let events = halted_events(&next, Some(reason));
    Ok(finish(record, next, TransitionKind::Rejected, events, now))
}

fn withdraw(
    record: &ApprovalRecord,
    actor_id: &UserId,
    reason: &str,
    admin_override: bool,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, ApprovalError> {
    if !admin_override && actor_id != &record.requested_by {
        return Err(ApprovalError::Forbidden(format!(
            "only the requesting author or an administrator may withdraw `{}`",
            record.id
        )));
    }
    let reason = required_reason(reason)?;

    let mut next = record.clone();
    next.overall_status = ApprovalStatus::Withdrawn;
    next.terminal_reason = Some(reason.clone());

    let events = halted_events(&next, Some(reason));
    Ok(finish(record, next, TransitionKind::Withdrawn, events, now))
}

fn finish(
    previous: &ApprovalRecord,
    mut next: ApprovalRecord,
    kind: TransitionKind,
    events: Vec<ApprovalEvent>,
    now: DateTime<Utc>,
) -> TransitionOutcome {
    next.version = previous.version + 1;
    next.updated_at = now;
    TransitionOutcome {
        kind,
        from_index: previous.current_index,
        to_index: next.current_index,
        expected_version: Some(previous.version),
        record: next,
        events,
    }
}

fn ensure_turn(record: &ApprovalRecord, actor_id: &UserId) -> Result<usize, ApprovalError> {
    let index = record.current_index.ok_or_else(|| {
        ApprovalError::InvariantViolation(format!("pending record `{}` has no cursor", record.id))
    })?;
    match record.steps.get(index) {
        Some(step) if &step.approver_id == actor_id => Ok(index),
        Some(_) => Err(ApprovalError::NotYourTurn {
            record_id: record.id.clone(),
            actor_id: actor_id.clone(),
        }),
        None => Err(ApprovalError::InvariantViolation(format!(
            "record `{}` cursor {index} is out of range",
            record.id
        ))),
    }
}

fn step_mut(record: &mut ApprovalRecord, index: usize) -> Result<&mut ApprovalStep, ApprovalError> {
    let record_id = record.id.clone();
    record.steps.get_mut(index).ok_or_else(|| {
        ApprovalError::InvariantViolation(format!("record `{record_id}` has no step {index}"))
    })
}

fn normalize_approvers(
    approver_ids: &[UserId],
    max_approvers: usize,
) -> Result<Vec<UserId>, ApprovalError> {
    if approver_ids.is_empty() {
        return Err(ApprovalError::InvalidRequest("approver list must not be empty".to_owned()));
    }
    if approver_ids.len() > max_approvers {
        return Err(ApprovalError::InvalidRequest(format!(
            "approver list has {} entries; at most {max_approvers} are allowed",
            approver_ids.len()
        )));
    }

    let mut seen = HashSet::with_capacity(approver_ids.len());
    let mut normalized = Vec::with_capacity(approver_ids.len());
    for (position, approver_id) in approver_ids.iter().enumerate() {
        let trimmed = approver_id.0.trim();
        if trimmed.is_empty() {
            return Err(ApprovalError::InvalidRequest(format!(
                "approver at position {position} is blank"
            )));
        }
        if !seen.insert(trimmed.to_owned()) {
            return Err(ApprovalError::InvalidRequest(format!(
                "approver `{trimmed}` appears more than once"
            )));
        }
        normalized.push(UserId(trimmed.to_owned()));
    }

    Ok(normalized)
}

fn normalize_comments(comments: Option<&str>) -> Result<Option<String>, ApprovalError> {
    let Some(trimmed) = comments.map(str::trim).filter(|value| !value.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_COMMENT_CHARS {
        return Err(ApprovalError::InvalidRequest(format!(
            "comments exceed {MAX_COMMENT_CHARS} characters"
        )));
    }
    Ok(Some(trimmed.to_owned()))
}

fn required_reason(reason: &str) -> Result<String, ApprovalError> {
    normalize_comments(Some(reason))?.ok_or(ApprovalError::MissingReason)
}

fn action_required(record: &ApprovalRecord, position: usize) -> Result<ApprovalEvent, ApprovalError> {
    let step = record.steps.get(position).ok_or_else(|| {
        ApprovalError::InvariantViolation(format!("record `{}` has no step {position}", record.id))
    })?;
    Ok(ApprovalEvent::ActionRequired {
        record_id: record.id.clone(),
        notice_id: record.notice_id.clone(),
        approver_id: step.approver_id.clone(),
        position,
        total_steps: record.steps.len(),
    })
}

fn halted_events(record: &ApprovalRecord, reason: Option<String>) -> Vec<ApprovalEvent> {
    vec![
        ApprovalEvent::ReturnToDraft {
            record_id: record.id.clone(),
            notice_id: record.notice_id.clone(),
            status: record.overall_status,
            reason: reason.clone(),
        },
        ApprovalEvent::ChainHalted {
            record_id: record.id.clone(),
            notice_id: record.notice_id.clone(),
            author_id: record.requested_by.clone(),
            status: record.overall_status,
            reason,
        },
    ]
}

fn emit_audit<S>(
    sink: &S,
    audit: &AuditContext,
    action: &str,
    result: &Result<TransitionOutcome, ApprovalError>,
) where
    S: AuditSink + ?Sized,
{
    match result {
        Ok(outcome) => {
            let mut context = audit.clone();
            context.record_id = Some(outcome.record.id.clone());
            context.notice_id = Some(outcome.record.notice_id.clone());
            sink.emit(
                context
                    .event("approval.transition.applied", AuditCategory::Approval, AuditOutcome::Success)
                    .with_metadata("action", action)
                    .with_metadata("transition", outcome.kind.as_str())
                    .with_metadata("from_index", format_index(outcome.from_index))
                    .with_metadata("to_index", format_index(outcome.to_index))
                    .with_metadata("status", outcome.record.overall_status.as_str())
                    .with_metadata("version", outcome.record.version.to_string()),
            );
        }
        Err(error) => {
            sink.emit(
                audit
                    .event("approval.transition.rejected", AuditCategory::Approval, AuditOutcome::Rejected)
                    .with_metadata("action", action)
                    .with_metadata("error_kind", error.kind().as_str())
                    .with_metadata("error", error.to_string()),
            );
        }
    }
}

fn format_index(index: Option<usize>) -> String {
    index.map(|value| value.to_string()).unwrap_or_else(|| "none".to_owned())
}
