use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};

use noticeboard_core::domain::approval::{
    ApprovalRecord, ApprovalStatus, ApprovalStep, RecordId, StepStatus,
};
use noticeboard_core::domain::event::OutboxEntry;
use noticeboard_core::domain::notice::{NoticeId, UserId};
use noticeboard_core::domain::signature::SignatureRef;

use super::outbox::insert_entries;
use super::{
    conflict_or_database, format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32,
    parse_u64, ApprovalRecordRepository, CasOutcome, RepositoryError,
};
use crate::DbPool;

const RECORD_COLUMNS: &str = "id, notice_id, requested_by, current_index, overall_status, version,
     supersedes, terminal_reason, created_at, updated_at";

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn hydrate(&self, rows: Vec<SqliteRow>) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(load_record(&mut conn, &row).await?);
        }
        Ok(records)
    }
}

#[async_trait::async_trait]
impl ApprovalRecordRepository for SqlApprovalRepository {
    async fn find_by_id(&self, id: &RecordId) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM approval_record WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.into_iter().next())
    }

    async fn find_latest_for_notice(
        &self,
        notice_id: &NoticeId,
    ) -> Result<Option<ApprovalRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE notice_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 1"
        ))
        .bind(&notice_id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(self.hydrate(row.into_iter().collect()).await?.into_iter().next())
    }

    async fn list_for_notice(
        &self,
        notice_id: &NoticeId,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE notice_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&notice_id.0)
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn list_pending_for_approver(
        &self,
        approver_id: &UserId,
        limit: u32,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM approval_record
             WHERE current_approver_id = ? AND overall_status = 'pending'
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?"
        ))
        .bind(&approver_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        self.hydrate(rows).await
    }

    async fn insert(
        &self,
        record: &ApprovalRecord,
        events: &[OutboxEntry],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_record
                (id, notice_id, requested_by, current_index, current_approver_id, overall_status,
                 version, supersedes, terminal_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id.0)
        .bind(&record.notice_id.0)
        .bind(&record.requested_by.0)
        .bind(record.current_index.map(index_to_i64))
        .bind(record.active_approver().map(|id| id.0.clone()))
        .bind(record.overall_status.as_str())
        .bind(i64::from(record.version))
        .bind(record.supersedes.as_ref().map(|id| id.0.clone()))
        .bind(&record.terminal_reason)
        .bind(format_timestamp(&record.created_at))
        .bind(format_timestamp(&record.updated_at))
        .execute(&mut *tx)
        .await
        .map_err(|error| {
            conflict_or_database(
                error,
                &format!("notice `{}` already has a pending approval record", record.notice_id),
            )
        })?;

        for (position, step) in record.steps.iter().enumerate() {
            sqlx::query(
                "INSERT INTO approval_step
                    (record_id, position, approver_id, status, comments, signature_ref, decided_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&record.id.0)
            .bind(index_to_i64(position))
            .bind(&step.approver_id.0)
            .bind(step.status.as_str())
            .bind(&step.comments)
            .bind(step.signature_ref.as_ref().map(|signature| signature.0.clone()))
            .bind(step.decided_at.as_ref().map(format_timestamp))
            .execute(&mut *tx)
            .await?;
        }

        insert_entries(&mut tx, events).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        record: &ApprovalRecord,
        expected_version: u32,
        events: &[OutboxEntry],
    ) -> Result<CasOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_record
             SET current_index = ?, current_approver_id = ?, overall_status = ?, version = ?,
                 terminal_reason = ?, updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(record.current_index.map(index_to_i64))
        .bind(record.active_approver().map(|id| id.0.clone()))
        .bind(record.overall_status.as_str())
        .bind(i64::from(record.version))
        .bind(&record.terminal_reason)
        .bind(format_timestamp(&record.updated_at))
        .bind(&record.id.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(CasOutcome::Stale);
        }

        for (position, step) in record.steps.iter().enumerate() {
            sqlx::query(
                "UPDATE approval_step
                 SET status = ?, comments = ?, signature_ref = ?, decided_at = ?
                 WHERE record_id = ? AND position = ?",
            )
            .bind(step.status.as_str())
            .bind(&step.comments)
            .bind(step.signature_ref.as_ref().map(|signature| signature.0.clone()))
            .bind(step.decided_at.as_ref().map(format_timestamp))
            .bind(&record.id.0)
            .bind(index_to_i64(position))
            .execute(&mut *tx)
            .await
            .map_err(|error| {
                conflict_or_database(error, "signature is already attached to another step")
            })?;
        }

        insert_entries(&mut tx, events).await?;
        tx.commit().await?;
        Ok(CasOutcome::Applied)
    }

    async fn count_by_status(&self) -> Result<Vec<(ApprovalStatus, u64)>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT overall_status, COUNT(*) AS count
             FROM approval_record
             GROUP BY overall_status
             ORDER BY overall_status",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let status_raw: String = row.try_get("overall_status")?;
                let status = ApprovalStatus::parse(&status_raw).ok_or_else(|| {
                    RepositoryError::Decode(format!("unknown approval status `{status_raw}`"))
                })?;
                Ok((status, parse_u64("count", row.try_get("count")?)?))
            })
            .collect()
    }
}

async fn load_record(
    conn: &mut SqliteConnection,
    row: &SqliteRow,
) -> Result<ApprovalRecord, RepositoryError> {
    let id = RecordId(row.try_get("id")?);
    let step_rows = sqlx::query(
        "SELECT position, approver_id, status, comments, signature_ref, decided_at
         FROM approval_step
         WHERE record_id = ?
         ORDER BY position ASC",
    )
    .bind(&id.0)
    .fetch_all(&mut *conn)
    .await?;

    let mut steps = Vec::with_capacity(step_rows.len());
    for (expected, step_row) in step_rows.iter().enumerate() {
        let position: i64 = step_row.try_get("position")?;
        if position != index_to_i64(expected) {
            return Err(RepositoryError::Decode(format!(
                "record `{id}` has a gap in its steps at position {expected}"
            )));
        }
        steps.push(step_from_row(step_row)?);
    }

    let status_raw: String = row.try_get("overall_status")?;
    let overall_status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{status_raw}`")))?;
    let current_index = row
        .try_get::<Option<i64>, _>("current_index")?
        .map(|value| {
            usize::try_from(value).map_err(|_| {
                RepositoryError::Decode(format!("invalid current_index for `{id}`: {value}"))
            })
        })
        .transpose()?;

    Ok(ApprovalRecord {
        notice_id: NoticeId(row.try_get("notice_id")?),
        requested_by: UserId(row.try_get("requested_by")?),
        steps,
        current_index,
        overall_status,
        version: parse_u32("version", row.try_get("version")?)?,
        supersedes: row.try_get::<Option<String>, _>("supersedes")?.map(RecordId),
        terminal_reason: row.try_get("terminal_reason")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
        id,
    })
}

fn step_from_row(row: &SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let status_raw: String = row.try_get("status")?;
    let status = StepStatus::parse(&status_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status_raw}`")))?;

    Ok(ApprovalStep {
        approver_id: UserId(row.try_get("approver_id")?),
        status,
        comments: row.try_get("comments")?,
        signature_ref: row.try_get::<Option<String>, _>("signature_ref")?.map(SignatureRef),
        decided_at: parse_optional_timestamp("decided_at", row.try_get("decided_at")?)?,
    })
}

fn index_to_i64(index: usize) -> i64 {
    i64::try_from(index).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use noticeboard_core::approvals::{ApprovalCommand, ApprovalEngine, ApprovalRequest};
    use noticeboard_core::domain::approval::{ApprovalRecord, ApprovalStatus, StepStatus};
    use noticeboard_core::domain::event::OutboxEntry;
    use noticeboard_core::domain::notice::{NoticeId, UserId};

    use super::SqlApprovalRepository;
    use crate::repositories::{
        ApprovalRecordRepository, CasOutcome, OutboxRepository, RepositoryError,
        SqlOutboxRepository,
    };
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn request(notice: &str, approvers: &[&str]) -> ApprovalRequest {
        ApprovalRequest {
            notice_id: NoticeId(notice.to_owned()),
            approver_ids: approvers.iter().map(|id| UserId((*id).to_owned())).collect(),
            requested_by: UserId("author".to_owned()),
        }
    }

    fn outbox(events: &[noticeboard_core::domain::event::ApprovalEvent]) -> Vec<OutboxEntry> {
        events.iter().cloned().map(|event| OutboxEntry::new(event, Utc::now())).collect()
    }

    async fn open(repo: &SqlApprovalRepository, notice: &str, approvers: &[&str]) -> ApprovalRecord {
        let outcome = ApprovalEngine::default()
            .request(&request(notice, approvers), None, Utc::now())
            .expect("request");
        repo.insert(&outcome.record, &outbox(&outcome.events)).await.expect("insert");
        outcome.record
    }

    #[tokio::test]
    async fn insert_then_find_round_trips_record_and_steps() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool.clone());
        let record = open(&repo, "N-1", &["a", "b", "c"]).await;

        let loaded = repo.find_by_id(&record.id).await.expect("find").expect("exists");
        assert_eq!(loaded.notice_id, record.notice_id);
        assert_eq!(loaded.steps, record.steps);
        assert_eq!(loaded.current_index, Some(0));
        assert_eq!(loaded.version, 1);
        assert_eq!(
            (loaded.created_at - record.created_at).num_milliseconds(),
            0,
            "timestamps are stored with microsecond precision"
        );

        let events = SqlOutboxRepository::new(pool).list_for_record(&record.id).await.expect("outbox");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.kind(), "action_required");
    }

    #[tokio::test]
    async fn compare_and_swap_applies_once_per_version() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let engine = ApprovalEngine::default();
        let record = open(&repo, "N-2", &["a", "b"]).await;

        let command =
            ApprovalCommand::Approve { actor_id: UserId("a".to_owned()), comments: None, signature_ref: None };
        let outcome = engine.apply(&record, &command, Utc::now()).expect("approve");

        let first = repo
            .compare_and_swap(&outcome.record, record.version, &outbox(&outcome.events))
            .await
            .expect("first write");
        let second = repo
            .compare_and_swap(&outcome.record, record.version, &outbox(&outcome.events))
            .await
            .expect("second write");

        assert_eq!(first, CasOutcome::Applied);
        assert_eq!(second, CasOutcome::Stale);

        let loaded = repo.find_by_id(&record.id).await.expect("find").expect("exists");
        assert_eq!(loaded.current_index, Some(1));
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.steps[0].status, StepStatus::Approved);
        assert!(loaded.steps[0].decided_at.is_some());
    }

    #[tokio::test]
    async fn second_pending_record_for_notice_is_a_conflict() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        open(&repo, "N-3", &["a"]).await;

        let duplicate = ApprovalEngine::default()
            .request(&request("N-3", &["b"]), None, Utc::now())
            .expect("engine does not know about the stored record");
        let error = repo.insert(&duplicate.record, &[]).await.expect_err("unique index");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn pending_projection_follows_the_cursor() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let engine = ApprovalEngine::default();
        let first = open(&repo, "N-4", &["a", "b"]).await;
        let _second = open(&repo, "N-5", &["b", "a"]).await;

        let for_a = repo.list_pending_for_approver(&UserId("a".to_owned()), 10).await.expect("list");
        assert_eq!(for_a.iter().map(|r| r.notice_id.0.as_str()).collect::<Vec<_>>(), vec!["N-4"]);

        let outcome = engine
            .apply(
                &first,
                &ApprovalCommand::Approve {
                    actor_id: UserId("a".to_owned()),
                    comments: None,
                    signature_ref: None,
                },
                Utc::now(),
            )
            .expect("approve");
        repo.compare_and_swap(&outcome.record, first.version, &[]).await.expect("cas");

        let for_a = repo.list_pending_for_approver(&UserId("a".to_owned()), 10).await.expect("list");
        assert!(for_a.is_empty());
        let for_b = repo.list_pending_for_approver(&UserId("b".to_owned()), 10).await.expect("list");
        assert_eq!(for_b.len(), 2);
        let limited =
            repo.list_pending_for_approver(&UserId("b".to_owned()), 1).await.expect("list");
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn history_keeps_superseded_records_in_creation_order() {
        let pool = setup().await;
        let repo = SqlApprovalRepository::new(pool);
        let engine = ApprovalEngine::default();
        let first = open(&repo, "N-6", &["a"]).await;

        let rejected = engine
            .apply(
                &first,
                &ApprovalCommand::Reject {
                    actor_id: UserId("a".to_owned()),
                    reason: "missing venue".to_owned(),
                },
                Utc::now(),
            )
            .expect("reject");
        repo.compare_and_swap(&rejected.record, first.version, &[]).await.expect("cas");

        let second = engine
            .request(&request("N-6", &["a"]), Some(&rejected.record), Utc::now())
            .expect("re-request");
        repo.insert(&second.record, &[]).await.expect("insert second");

        let history = repo.list_for_notice(&NoticeId("N-6".to_owned())).await.expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, first.id);
        assert_eq!(history[0].overall_status, ApprovalStatus::Rejected);
        assert_eq!(history[1].supersedes.as_ref(), Some(&first.id));

        let latest = repo
            .find_latest_for_notice(&NoticeId("N-6".to_owned()))
            .await
            .expect("latest")
            .expect("exists");
        assert_eq!(latest.id, second.record.id);

        let counts = repo.count_by_status().await.expect("counts");
        assert!(counts.contains(&(ApprovalStatus::Pending, 1)));
        assert!(counts.contains(&(ApprovalStatus::Rejected, 1)));
    }
}
