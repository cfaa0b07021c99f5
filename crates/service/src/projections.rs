use std::sync::Arc;

use noticeboard_core::domain::approval::ApprovalSnapshot;
use noticeboard_core::domain::notice::{NoticeId, UserId};
use noticeboard_core::errors::{ApplicationError, ApprovalError};
use noticeboard_db::repositories::ApprovalRecordRepository;

pub const DEFAULT_PENDING_LIMIT: u32 = 50;
pub const MAX_PENDING_LIMIT: u32 = 200;

/// Read-only views over approval records. These read without locking and
/// may trail a concurrent transition by one step.
pub struct ApprovalQueries {
    records: Arc<dyn ApprovalRecordRepository>,
}

impl ApprovalQueries {
    pub fn new(records: Arc<dyn ApprovalRecordRepository>) -> Self {
        Self { records }
    }

    pub async fn pending_for(
        &self,
        approver_id: &UserId,
        limit: Option<u32>,
    ) -> Result<Vec<ApprovalSnapshot>, ApplicationError> {
        let limit = limit.unwrap_or(DEFAULT_PENDING_LIMIT).clamp(1, MAX_PENDING_LIMIT);
        let records = self.records.list_pending_for_approver(approver_id, limit).await?;
        Ok(records.iter().map(|record| record.snapshot()).collect())
    }

    pub async fn history_for(&self, notice_id: &NoticeId) -> Result<Vec<ApprovalSnapshot>, ApplicationError> {
        let records = self.records.list_for_notice(notice_id).await?;
        Ok(records.iter().map(|record| record.snapshot()).collect())
    }

    pub async fn status_for_notice(&self, notice_id: &NoticeId) -> Result<ApprovalSnapshot, ApplicationError> {
        self.records
            .find_latest_for_notice(notice_id)
            .await?
            .map(|record| record.snapshot())
            .ok_or_else(|| ApprovalError::not_found("approval record for notice", notice_id.0.clone()).into())
    }
}
