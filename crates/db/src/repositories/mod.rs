use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use noticeboard_core::domain::approval::{ApprovalRecord, ApprovalStatus, RecordId};
use noticeboard_core::domain::event::{EventChannel, OutboxEntry, OutboxEventId};
use noticeboard_core::domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};
use noticeboard_core::domain::notification::{Notification, NotificationId};
use noticeboard_core::domain::signature::{SignatureBlob, SignatureRef};
use noticeboard_core::errors::ApplicationError;

pub mod approval;
pub mod directory;
pub mod memory;
pub mod notification;
pub mod outbox;
pub mod signature;

pub use approval::SqlApprovalRepository;
pub use directory::SqlDirectory;
pub use memory::{InMemoryApprovalStore, InMemoryNotificationRepository};
pub use notification::SqlNotificationRepository;
pub use outbox::SqlOutboxRepository;
pub use signature::SqlSignatureRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    /// A uniqueness rule held by the store refused the write.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        Self::Persistence(error.to_string())
    }
}

/// Result of an optimistic write. `Stale` means another writer bumped the
/// version first and nothing was written.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CasOutcome {
    Applied,
    Stale,
}

#[async_trait]
pub trait ApprovalRecordRepository: Send + Sync {
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<ApprovalRecord>, RepositoryError>;

    async fn find_latest_for_notice(
        &self,
        notice_id: &NoticeId,
    ) -> Result<Option<ApprovalRecord>, RepositoryError>;

    /// Every record for the notice, oldest first.
    async fn list_for_notice(
        &self,
        notice_id: &NoticeId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;

    /// Pending records whose active step belongs to the approver, oldest first.
    async fn list_pending_for_approver(
        &self,
        approver_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError>;

    /// Inserts a new record together with its outbox entries. Fails with
    /// `Conflict` when the notice already has a pending record.
    async fn insert(
        &self,
        record: &ApprovalRecord,
        events: &[OutboxEntry],
    ) -> Result<(), RepositoryError>;

    /// Replaces the record if the stored version still equals
    /// `expected_version`, appending the outbox entries in the same write.
    async fn compare_and_swap(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
        events: &[OutboxEntry],
    ) -> Result<CasOutcome, RepositoryError>;

    async fn count_by_status(&self) -> Result<Vec<(ApprovalStatus, u64)>, RepositoryError>;
}

#[async_trait]
pub trait SignatureRepository: Send + Sync {
    async fn insert(&self, blob: &SignatureBlob) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        signature_ref: &SignatureRef,
    ) -> Result<Option<SignatureBlob>, RepositoryError>;

    /// The record a signature is already attached to, if any.
    async fn find_binding(
        &self,
        signature_ref: &SignatureRef,
    ) -> Result<Option<RecordId>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn find(&self, id: &OutboxEventId) -> Result<Option<OutboxEntry>, RepositoryError>;

    /// Undelivered entries, least-attempted first and then oldest first,
    /// optionally for one channel.
    async fn list_undelivered(
        &self,
        channel: Option<EventChannel>,
        limit: u32,
    ) -> Result<Vec<OutboxEntry>, RepositoryError>;

    async fn list_for_record(&self, record_id: &RecordId)
        -> Result<Vec<OutboxEntry>, RepositoryError>;

    /// Returns `false` when the entry was already delivered or is unknown.
    async fn mark_delivered(
        &self,
        id: &OutboxEventId,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    async fn record_failure(&self, id: &OutboxEventId, error: &str)
        -> Result<(), RepositoryError>;

    async fn count_undelivered(&self) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Returns `false` when a notification for the same source event exists.
    async fn insert_if_absent(&self, notification: &Notification)
        -> Result<bool, RepositoryError>;

    /// Newest first.
    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError>;

    async fn count_unread(&self, user_id: &UserId) -> Result<u64, RepositoryError>;

    /// Returns `false` when no notification with that id belongs to the user.
    async fn mark_read(
        &self,
        id: &NotificationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError>;

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError>;
}

/// Write side of the synced notice/approver registry.
#[async_trait]
pub trait DirectoryRegistry: Send + Sync {
    async fn upsert_notice(&self, notice: &NoticeRef) -> Result<(), RepositoryError>;
    async fn upsert_approver(&self, approver: &ApproverRef) -> Result<(), RepositoryError>;
}

pub(crate) fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|parsed| parsed.with_timezone(&Utc)).map_err(
        |error| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {value} ({error})")),
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_u64(column: &str, value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative integer): {value}"
        ))
    })
}

/// Maps a unique-constraint failure to `Conflict`, anything else to
/// `Database`.
pub(crate) fn conflict_or_database(error: sqlx::Error, what: &str) -> RepositoryError {
    let unique_violation =
        matches!(&error, sqlx::Error::Database(db) if db.is_unique_violation());
    if unique_violation {
        RepositoryError::Conflict(what.to_owned())
    } else {
        RepositoryError::Database(error)
    }
}
