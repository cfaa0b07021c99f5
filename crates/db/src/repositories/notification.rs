use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use noticeboard_core::domain::approval::RecordId;
use noticeboard_core::domain::event::OutboxEventId;
use noticeboard_core::domain::notice::{NoticeId, UserId};
use noticeboard_core::domain::notification::{Notification, NotificationId, NotificationKind};

use super::{format_timestamp, parse_timestamp, parse_u64, NotificationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNotificationRepository {
    pool: DbPool,
}

impl SqlNotificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl NotificationRepository for SqlNotificationRepository {
    async fn insert_if_absent(&self, notification: &Notification) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO notification
                (id, user_id, title, message, kind, record_id, notice_id, source_event, is_read,
                 created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&notification.id.0)
        .bind(&notification.user_id.0)
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.kind.as_str())
        .bind(notification.record_id.as_ref().map(|id| id.0.clone()))
        .bind(notification.notice_id.as_ref().map(|id| id.0.clone()))
        .bind(notification.source_event.as_ref().map(|id| id.0.clone()))
        .bind(i64::from(notification.is_read))
        .bind(format_timestamp(&notification.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<Vec<Notification>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, user_id, title, message, kind, record_id, notice_id, source_event, is_read,
                    created_at
             FROM notification
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
        )
        .bind(&user_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(notification_from_row).collect()
    }

    async fn count_unread(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notification WHERE user_id = ? AND is_read = 0")
                .bind(&user_id.0)
                .fetch_one(&self.pool)
                .await?;
        parse_u64("count", count)
    }

    async fn mark_read(
        &self,
        id: &NotificationId,
        user_id: &UserId,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query("UPDATE notification SET is_read = 1 WHERE id = ? AND user_id = ?")
            .bind(&id.0)
            .bind(&user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_all_read(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let result =
            sqlx::query("UPDATE notification SET is_read = 1 WHERE user_id = ? AND is_read = 0")
                .bind(&user_id.0)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, RepositoryError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = NotificationKind::parse(&kind_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown notification kind `{kind_raw}`"))
    })?;

    Ok(Notification {
        id: NotificationId(row.try_get("id")?),
        user_id: UserId(row.try_get("user_id")?),
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        kind,
        record_id: row.try_get::<Option<String>, _>("record_id")?.map(RecordId),
        notice_id: row.try_get::<Option<String>, _>("notice_id")?.map(NoticeId),
        source_event: row.try_get::<Option<String>, _>("source_event")?.map(OutboxEventId),
        is_read: row.try_get::<i64, _>("is_read")? != 0,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}
