use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use noticeboard_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use noticeboard_core::domain::notice::UserId;
use noticeboard_core::domain::signature::{SignatureBlob, SignatureRef};
use noticeboard_core::errors::{ApplicationError, ApprovalError};
use noticeboard_core::signature::{SignaturePayload, SignaturePolicy};
use noticeboard_db::repositories::SignatureRepository;

/// What the caller gets back after a capture. The image itself is fetched
/// separately.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureReceipt {
    pub signature_ref: SignatureRef,
    pub content_type: String,
    pub sha256_hex: String,
    pub byte_len: usize,
    pub captured_by: Option<UserId>,
}

impl From<&SignatureBlob> for SignatureReceipt {
    fn from(blob: &SignatureBlob) -> Self {
        Self {
            signature_ref: blob.signature_ref.clone(),
            content_type: blob.content_type.clone(),
            sha256_hex: blob.sha256_hex.clone(),
            byte_len: blob.byte_len(),
            captured_by: blob.captured_by.clone(),
        }
    }
}

pub struct SignatureService {
    policy: SignaturePolicy,
    signatures: Arc<dyn SignatureRepository>,
    audit: Arc<dyn AuditSink>,
}

impl SignatureService {
    pub fn new(
        policy: SignaturePolicy,
        signatures: Arc<dyn SignatureRepository>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { policy, signatures, audit }
    }

    pub async fn capture(
        &self,
        payload: SignaturePayload,
        captured_by: Option<UserId>,
        correlation_id: &str,
    ) -> Result<SignatureReceipt, ApplicationError> {
        let actor = captured_by.as_ref().map(|id| id.0.clone()).unwrap_or_else(|| "anonymous".to_owned());
        let audit = AuditContext::new(None, None, correlation_id, actor);

        let validated = match self.policy.validate(payload) {
            Ok(validated) => validated,
            Err(error) => {
                self.audit.emit(
                    audit
                        .event("signature.capture.rejected", AuditCategory::Signature, AuditOutcome::Rejected)
                        .with_metadata("error", error.to_string()),
                );
                return Err(error.into());
            }
        };

        let blob = SignatureBlob {
            signature_ref: SignatureRef::generate(),
            content_type: validated.content_type,
            sha256_hex: validated.sha256_hex,
            bytes: validated.bytes,
            captured_by,
            captured_at: Utc::now(),
        };
        self.signatures.insert(&blob).await?;

        self.audit.emit(
            audit
                .event("signature.captured", AuditCategory::Signature, AuditOutcome::Success)
                .with_metadata("signature_ref", blob.signature_ref.0.clone())
                .with_metadata("content_type", blob.content_type.clone())
                .with_metadata("byte_len", blob.byte_len().to_string())
                .with_metadata("sha256", blob.sha256_hex.clone()),
        );
        info!(
            event_name = "signature.blob.stored",
            correlation_id,
            signature_ref = %blob.signature_ref,
            byte_len = blob.byte_len(),
            "signature image stored"
        );

        Ok(SignatureReceipt::from(&blob))
    }

    pub async fn fetch(&self, signature_ref: &SignatureRef) -> Result<SignatureBlob, ApplicationError> {
        self.signatures
            .find(signature_ref)
            .await?
            .ok_or_else(|| ApprovalError::not_found("signature", signature_ref.0.clone()).into())
    }
}
