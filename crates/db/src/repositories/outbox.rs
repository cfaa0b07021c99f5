use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use noticeboard_core::domain::approval::RecordId;
use noticeboard_core::domain::event::{ApprovalEvent, EventChannel, OutboxEntry, OutboxEventId};

use super::{
    format_timestamp, parse_optional_timestamp, parse_timestamp, parse_u32, parse_u64,
    OutboxRepository, RepositoryError,
};
use crate::DbPool;

const OUTBOX_COLUMNS: &str =
    "id, payload_json, created_at, delivered_at, attempts, last_error";

/// Error text kept per entry; longer messages are cut at a char boundary.
const MAX_ERROR_CHARS: usize = 500;

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

/// Appends outbox rows inside the caller's transaction so they commit or
/// roll back with the record write.
pub(crate) async fn insert_entries(
    tx: &mut Transaction<'_, Sqlite>,
    entries: &[OutboxEntry],
) -> Result<(), RepositoryError> {
    for entry in entries {
        let payload = serde_json::to_string(&entry.event)
            .map_err(|error| RepositoryError::Decode(format!("outbox payload: {error}")))?;

        sqlx::query(
            "INSERT INTO approval_outbox
                (id, record_id, notice_id, channel, kind, payload_json, created_at,
                 delivered_at, attempts, last_error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.event.record_id().0)
        .bind(&entry.event.notice_id().0)
        .bind(entry.channel().as_str())
        .bind(entry.event.kind())
        .bind(payload)
        .bind(format_timestamp(&entry.created_at))
        .bind(entry.delivered_at.as_ref().map(format_timestamp))
        .bind(i64::from(entry.attempts))
        .bind(&entry.last_error)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn find(&self, id: &OutboxEventId) -> Result<Option<OutboxEntry>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {OUTBOX_COLUMNS} FROM approval_outbox WHERE id = ?"))
                .bind(&id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_undelivered(
        &self,
        channel: Option<EventChannel>,
        limit: u32,
    ) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM approval_outbox
             WHERE delivered_at IS NULL AND (? IS NULL OR channel = ?)
             ORDER BY attempts ASC, created_at ASC, rowid ASC
             LIMIT ?"
        ))
        .bind(channel.map(|channel| channel.as_str()))
        .bind(channel.map(|channel| channel.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn list_for_record(
        &self,
        record_id: &RecordId,
    ) -> Result<Vec<OutboxEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {OUTBOX_COLUMNS} FROM approval_outbox
             WHERE record_id = ?
             ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(&record_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn mark_delivered(
        &self,
        id: &OutboxEventId,
        delivered_at: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE approval_outbox
             SET delivered_at = ?, attempts = attempts + 1, last_error = NULL
             WHERE id = ? AND delivered_at IS NULL",
        )
        .bind(format_timestamp(&delivered_at))
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_failure(&self, id: &OutboxEventId, error: &str) -> Result<(), RepositoryError> {
        let truncated: String = error.chars().take(MAX_ERROR_CHARS).collect();
        sqlx::query(
            "UPDATE approval_outbox
             SET attempts = attempts + 1, last_error = ?
             WHERE id = ? AND delivered_at IS NULL",
        )
        .bind(truncated)
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_undelivered(&self) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM approval_outbox WHERE delivered_at IS NULL")
                .fetch_one(&self.pool)
                .await?;
        parse_u64("count", count)
    }
}

fn entry_from_row(row: &SqliteRow) -> Result<OutboxEntry, RepositoryError> {
    let id = OutboxEventId(row.try_get("id")?);
    let payload: String = row.try_get("payload_json")?;
    let event: ApprovalEvent = serde_json::from_str(&payload)
        .map_err(|error| RepositoryError::Decode(format!("outbox entry `{id}`: {error}")))?;

    Ok(OutboxEntry {
        event,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        delivered_at: parse_optional_timestamp("delivered_at", row.try_get("delivered_at")?)?,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        last_error: row.try_get("last_error")?,
        id,
    })
}
