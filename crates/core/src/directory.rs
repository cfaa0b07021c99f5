//! Lookups against collaborators the approval core does not own: the notice
//! store and the employee directory.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};
use crate::errors::{ApplicationError, ApprovalError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("directory lookup failed: {0}")]
    Unavailable(String),
}

impl From<DirectoryError> for ApplicationError {
    fn from(error: DirectoryError) -> Self {
        Self::Integration(error.to_string())
    }
}

#[async_trait]
pub trait Directory: Send + Sync {
    async fn find_notice(&self, notice_id: &NoticeId) -> Result<Option<NoticeRef>, DirectoryError>;

    async fn find_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Option<ApproverRef>, DirectoryError>;
}

/// Assumes the caller already validated notices and approvers upstream.
/// Every notice requires approval and has no known author.
#[derive(Clone, Debug, Default)]
pub struct TrustingDirectory;

#[async_trait]
impl Directory for TrustingDirectory {
    async fn find_notice(&self, notice_id: &NoticeId) -> Result<Option<NoticeRef>, DirectoryError> {
        Ok(Some(NoticeRef { notice_id: notice_id.clone(), author_id: None, requires_approval: true }))
    }

    async fn find_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Option<ApproverRef>, DirectoryError> {
        Ok(Some(ApproverRef {
            approver_id: approver_id.clone(),
            display_name: approver_id.0.clone(),
            role: "approver".to_owned(),
            active: true,
        }))
    }
}

/// Fixed in-process directory, mainly for tests and single-tenant demos.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    notices: HashMap<NoticeId, NoticeRef>,
    approvers: HashMap<UserId, ApproverRef>,
}

impl StaticDirectory {
    pub fn with_notice(mut self, notice: NoticeRef) -> Self {
        self.notices.insert(notice.notice_id.clone(), notice);
        self
    }

    pub fn with_approver(mut self, approver: ApproverRef) -> Self {
        self.approvers.insert(approver.approver_id.clone(), approver);
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn find_notice(&self, notice_id: &NoticeId) -> Result<Option<NoticeRef>, DirectoryError> {
        Ok(self.notices.get(notice_id).cloned())
    }

    async fn find_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Option<ApproverRef>, DirectoryError> {
        Ok(self.approvers.get(approver_id).cloned())
    }
}

/// Re-checks a request against the directory: the notice exists and needs
/// approval, the requester is its author when authorship is known, and every
/// approver is an active employee.
pub async fn vet_request<D>(
    directory: &D,
    notice_id: &NoticeId,
    requested_by: &UserId,
    approver_ids: &[UserId],
) -> Result<NoticeRef, ApplicationError>
where
    D: Directory + ?Sized,
{
    let notice = directory.find_notice(notice_id).await?.ok_or_else(|| {
        ApprovalError::InvalidRequest(format!("notice `{notice_id}` is not known to the directory"))
    })?;

    if !notice.requires_approval {
        return Err(ApprovalError::InvalidRequest(format!(
            "notice `{notice_id}` does not require approval"
        ))
        .into());
    }

    if let Some(author_id) = &notice.author_id {
        if author_id != requested_by {
            return Err(ApprovalError::InvalidRequest(format!(
                "`{requested_by}` is not the author of notice `{notice_id}`"
            ))
            .into());
        }
    }

    for approver_id in approver_ids {
        let active = directory
            .find_approver(approver_id)
            .await?
            .map(|approver| approver.active)
            .unwrap_or(false);
        if !active {
            return Err(ApprovalError::InvalidRequest(format!(
                "approver `{approver_id}` is not an active employee"
            ))
            .into());
        }
    }

    Ok(notice)
}

#[cfg(test)]
mod tests {
    use super::{vet_request, StaticDirectory, TrustingDirectory};
    use crate::domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};
    use crate::errors::{ApplicationError, ApprovalError};

    fn approver(id: &str, active: bool) -> ApproverRef {
        ApproverRef {
            approver_id: UserId(id.to_owned()),
            display_name: id.to_uppercase(),
            role: "hod".to_owned(),
            active,
        }
    }

    fn directory() -> StaticDirectory {
        StaticDirectory::default()
            .with_notice(NoticeRef {
                notice_id: NoticeId("N-1".to_owned()),
                author_id: Some(UserId("author".to_owned())),
                requires_approval: true,
            })
            .with_notice(NoticeRef {
                notice_id: NoticeId("N-free".to_owned()),
                author_id: None,
                requires_approval: false,
            })
            .with_approver(approver("a", true))
            .with_approver(approver("retired", false))
    }

    fn invalid(result: Result<NoticeRef, ApplicationError>) -> String {
        match result {
            Err(ApplicationError::Approval(ApprovalError::InvalidRequest(message))) => message,
            other => panic!("expected invalid request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trusting_directory_accepts_everything() {
        let notice = vet_request(
            &TrustingDirectory,
            &NoticeId("anything".to_owned()),
            &UserId("anyone".to_owned()),
            &[UserId("x".to_owned())],
        )
        .await
        .expect("trusting directory never refuses");
        assert!(notice.requires_approval);
        assert!(notice.author_id.is_none());
    }

    #[tokio::test]
    async fn static_directory_enforces_each_rule() {
        let directory = directory();
        let author = UserId("author".to_owned());
        let known = NoticeId("N-1".to_owned());

        vet_request(&directory, &known, &author, &[UserId("a".to_owned())])
            .await
            .expect("valid request passes");

        let message =
            invalid(vet_request(&directory, &NoticeId("N-404".to_owned()), &author, &[]).await);
        assert!(message.contains("not known"));

        let message =
            invalid(vet_request(&directory, &NoticeId("N-free".to_owned()), &author, &[]).await);
        assert!(message.contains("does not require approval"));

        let message = invalid(
            vet_request(&directory, &known, &UserId("intruder".to_owned()), &[]).await,
        );
        assert!(message.contains("not the author"));

        let message = invalid(
            vet_request(&directory, &known, &author, &[UserId("retired".to_owned())]).await,
        );
        assert!(message.contains("retired"));

        let message =
            invalid(vet_request(&directory, &known, &author, &[UserId("ghost".to_owned())]).await);
        assert!(message.contains("ghost"));
    }
}
