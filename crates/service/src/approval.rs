//! Orchestration of the approval chain: directory vetting, the pure engine,
//! optimistic persistence and audit.
//!
//! The engine decides every transition. This layer only loads the record,
//! hands it to the engine, and retries the compare-and-swap against fresh
//! state when another writer got there first.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use noticeboard_core::approvals::{ApprovalCommand, ApprovalEngine, ApprovalRequest, TransitionOutcome};
use noticeboard_core::audit::{AuditContext, AuditSink};
use noticeboard_core::directory::{vet_request, Directory};
use noticeboard_core::domain::approval::{ApprovalSnapshot, RecordId};
use noticeboard_core::domain::event::OutboxEntry;
use noticeboard_core::domain::notice::UserId;
use noticeboard_core::domain::signature::SignatureRef;
use noticeboard_core::errors::{ApplicationError, ApprovalError};
use noticeboard_db::repositories::{
    ApprovalRecordRepository, CasOutcome, RepositoryError, SignatureRepository,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveInput {
    pub actor_id: UserId,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub signature_ref: Option<SignatureRef>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectInput {
    pub actor_id: UserId,
    #[serde(default)]
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawInput {
    pub actor_id: UserId,
    #[serde(default)]
    pub reason: String,
    /// Set by the transport once it has verified an admin credential.
    #[serde(skip)]
    pub admin_override: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApprovalServiceSettings {
    pub enforce_directory: bool,
    pub cas_retry_limit: u32,
}

impl Default for ApprovalServiceSettings {
    fn default() -> Self {
        Self { enforce_directory: false, cas_retry_limit: 3 }
    }
}

pub struct ApprovalService {
    engine: ApprovalEngine,
    records: Arc<dyn ApprovalRecordRepository>,
    signatures: Arc<dyn SignatureRepository>,
    directory: Arc<dyn Directory>,
    audit: Arc<dyn AuditSink>,
    settings: ApprovalServiceSettings,
}

impl ApprovalService {
    pub fn new(
        engine: ApprovalEngine,
        records: Arc<dyn ApprovalRecordRepository>,
        signatures: Arc<dyn SignatureRepository>,
        directory: Arc<dyn Directory>,
        audit: Arc<dyn AuditSink>,
        settings: ApprovalServiceSettings,
    ) -> Self {
        Self { engine, records, signatures, directory, audit, settings }
    }

    pub async fn request_approval(
        &self,
        request: ApprovalRequest,
        correlation_id: &str,
    ) -> Result<ApprovalSnapshot, ApplicationError> {
        if self.settings.enforce_directory {
            vet_request(
                self.directory.as_ref(),
                &request.notice_id,
                &request.requested_by,
                &request.approver_ids,
            )
            .await?;
        }

        let latest = self.records.find_latest_for_notice(&request.notice_id).await?;
        let audit = AuditContext::new(
            Some(request.notice_id.clone()),
            latest.as_ref().map(|record| record.id.clone()),
            correlation_id,
            request.requested_by.0.clone(),
        );
        let outcome = self.engine.request_with_audit(
            &request,
            latest.as_ref(),
            Utc::now(),
            self.audit.as_ref(),
            &audit,
        )?;

        let entries = outbox_entries(&outcome);
        match self.records.insert(&outcome.record, &entries).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                // Lost the race against a concurrent request for the same notice.
                let current = self.records.find_latest_for_notice(&request.notice_id).await?;
                return Err(ApprovalError::AlreadyPending {
                    notice_id: request.notice_id.clone(),
                    record_id: current.map(|record| record.id),
                }
                .into());
            }
            Err(error) => return Err(error.into()),
        }

        info!(
            event_name = "approval.record.requested",
            correlation_id,
            record_id = %outcome.record.id,
            notice_id = %outcome.record.notice_id,
            steps = outcome.record.steps.len(),
            supersedes = outcome.record.supersedes.as_ref().map(|id| id.0.as_str()).unwrap_or("none"),
            "approval chain opened"
        );
        Ok(outcome.record.snapshot())
    }

    pub async fn approve(
        &self,
        record_id: &RecordId,
        input: ApproveInput,
        correlation_id: &str,
    ) -> Result<ApprovalSnapshot, ApplicationError> {
        if let Some(signature_ref) = &input.signature_ref {
            self.check_signature(signature_ref, &input.actor_id).await?;
        }

        let command = ApprovalCommand::Approve {
            actor_id: input.actor_id,
            comments: input.comments,
            signature_ref: input.signature_ref,
        };
        self.transition(record_id, command, correlation_id).await
    }

    pub async fn reject(
        &self,
        record_id: &RecordId,
        input: RejectInput,
        correlation_id: &str,
    ) -> Result<ApprovalSnapshot, ApplicationError> {
        let command = ApprovalCommand::Reject { actor_id: input.actor_id, reason: input.reason };
        self.transition(record_id, command, correlation_id).await
    }

    pub async fn withdraw(
        &self,
        record_id: &RecordId,
        input: WithdrawInput,
        correlation_id: &str,
    ) -> Result<ApprovalSnapshot, ApplicationError> {
        let command = ApprovalCommand::Withdraw {
            actor_id: input.actor_id,
            reason: input.reason,
            admin_override: input.admin_override,
        };
        self.transition(record_id, command, correlation_id).await
    }

    pub async fn get_status(&self, record_id: &RecordId) -> Result<ApprovalSnapshot, ApplicationError> {
        self.records
            .find_by_id(record_id)
            .await?
            .map(|record| record.snapshot())
            .ok_or_else(|| ApprovalError::not_found("approval record", record_id.0.clone()).into())
    }

    /// A signature may be bound once, and only by the user it was captured
    /// for when that is known.
    async fn check_signature(
        &self,
        signature_ref: &SignatureRef,
        actor_id: &UserId,
    ) -> Result<(), ApplicationError> {
        let blob = self.signatures.find(signature_ref).await?.ok_or_else(|| {
            ApprovalError::InvalidSignature(format!("signature `{signature_ref}` does not exist"))
        })?;

        if let Some(captured_by) = &blob.captured_by {
            if captured_by != actor_id {
                return Err(ApprovalError::InvalidSignature(format!(
                    "signature `{signature_ref}` was captured for another user"
                ))
                .into());
            }
        }

        if let Some(bound_to) = self.signatures.find_binding(signature_ref).await? {
            return Err(ApprovalError::InvalidSignature(format!(
                "signature `{signature_ref}` is already attached to `{bound_to}`"
            ))
            .into());
        }
        Ok(())
    }

    async fn transition(
        &self,
        record_id: &RecordId,
        command: ApprovalCommand,
        correlation_id: &str,
    ) -> Result<ApprovalSnapshot, ApplicationError> {
        let attempts = self.settings.cas_retry_limit.max(1);

        for attempt in 1..=attempts {
            let record = self
                .records
                .find_by_id(record_id)
                .await?
                .ok_or_else(|| ApprovalError::not_found("approval record", record_id.0.clone()))?;

            let audit = AuditContext::new(
                Some(record.notice_id.clone()),
                Some(record.id.clone()),
                correlation_id,
                command.actor_id().0.clone(),
            );
            let outcome = self.engine.apply_with_audit(
                &record,
                &command,
                Utc::now(),
                self.audit.as_ref(),
                &audit,
            )?;
            let expected_version = outcome.expected_version.unwrap_or(record.version);

            let entries = outbox_entries(&outcome);
            match self.records.compare_and_swap(&outcome.record, expected_version, &entries).await {
                Ok(CasOutcome::Applied) => {
                    info!(
                        event_name = "approval.transition.persisted",
                        correlation_id,
                        record_id = %outcome.record.id,
                        notice_id = %outcome.record.notice_id,
                        action = command.name(),
                        transition = outcome.kind.as_str(),
                        version = outcome.record.version,
                        attempt,
                        "approval transition persisted"
                    );
                    return Ok(outcome.record.snapshot());
                }
                Ok(CasOutcome::Stale) => {
                    warn!(
                        event_name = "approval.transition.stale",
                        correlation_id,
                        record_id = %record.id,
                        notice_id = %record.notice_id,
                        action = command.name(),
                        expected_version,
                        attempt,
                        "record changed underneath the transition; reloading"
                    );
                }
                Err(RepositoryError::Conflict(message)) => {
                    // The only uniqueness rule a transition can hit is the
                    // signature binding.
                    return Err(ApprovalError::InvalidSignature(message).into());
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ApplicationError::Persistence(format!(
            "approval record `{record_id}` kept changing; gave up after {attempts} attempts"
        )))
    }
}

fn outbox_entries(outcome: &TransitionOutcome) -> Vec<OutboxEntry> {
    let now = outcome.record.updated_at;
    outcome.events.iter().cloned().map(|event| OutboxEntry::new(event, now)).collect()
}
