use chrono::Utc;
use sqlx::Row;

use noticeboard_core::directory::{Directory, DirectoryError};
use noticeboard_core::domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};

use super::{format_timestamp, DirectoryRegistry, RepositoryError};
use crate::DbPool;

/// Directory backed by the locally synced `notice_ref` and `approver_ref`
/// tables.
pub struct SqlDirectory {
    pool: DbPool,
}

impl SqlDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn unavailable(error: sqlx::Error) -> DirectoryError {
    DirectoryError::Unavailable(error.to_string())
}

#[async_trait::async_trait]
impl Directory for SqlDirectory {
    async fn find_notice(&self, notice_id: &NoticeId) -> Result<Option<NoticeRef>, DirectoryError> {
        let row = sqlx::query(
            "SELECT notice_id, author_id, requires_approval FROM notice_ref WHERE notice_id = ?",
        )
        .bind(&notice_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| {
            Ok(NoticeRef {
                notice_id: NoticeId(row.try_get("notice_id")?),
                author_id: row.try_get::<Option<String>, _>("author_id")?.map(UserId),
                requires_approval: row.try_get::<i64, _>("requires_approval")? != 0,
            })
        })
        .transpose()
        .map_err(unavailable)
    }

    async fn find_approver(
        &self,
        approver_id: &UserId,
    ) -> Result<Option<ApproverRef>, DirectoryError> {
        let row = sqlx::query(
            "SELECT approver_id, display_name, role, active FROM approver_ref WHERE approver_id = ?",
        )
        .bind(&approver_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        row.map(|row| {
            Ok(ApproverRef {
                approver_id: UserId(row.try_get("approver_id")?),
                display_name: row.try_get("display_name")?,
                role: row.try_get("role")?,
                active: row.try_get::<i64, _>("active")? != 0,
            })
        })
        .transpose()
        .map_err(unavailable)
    }
}

#[async_trait::async_trait]
impl DirectoryRegistry for SqlDirectory {
    async fn upsert_notice(&self, notice: &NoticeRef) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO notice_ref (notice_id, author_id, requires_approval, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(notice_id) DO UPDATE SET
                author_id = excluded.author_id,
                requires_approval = excluded.requires_approval,
                updated_at = excluded.updated_at",
        )
        .bind(&notice.notice_id.0)
        .bind(notice.author_id.as_ref().map(|id| id.0.clone()))
        .bind(i64::from(notice.requires_approval))
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_approver(&self, approver: &ApproverRef) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approver_ref (approver_id, display_name, role, active, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(approver_id) DO UPDATE SET
                display_name = excluded.display_name,
                role = excluded.role,
                active = excluded.active,
                updated_at = excluded.updated_at",
        )
        .bind(&approver.approver_id.0)
        .bind(&approver.display_name)
        .bind(&approver.role)
        .bind(i64::from(approver.active))
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use noticeboard_core::directory::Directory;
    use noticeboard_core::domain::notice::{ApproverRef, NoticeId, NoticeRef, UserId};

    use super::SqlDirectory;
    use crate::repositories::DirectoryRegistry;
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn upserts_replace_previous_entries() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let directory = SqlDirectory::new(pool);

        let mut notice = NoticeRef {
            notice_id: NoticeId("N-1".to_owned()),
            author_id: Some(UserId("author".to_owned())),
            requires_approval: true,
        };
        directory.upsert_notice(&notice).await.expect("insert notice");
        notice.requires_approval = false;
        directory.upsert_notice(&notice).await.expect("update notice");

        let mut approver = ApproverRef {
            approver_id: UserId("hod".to_owned()),
            display_name: "Head of Department".to_owned(),
            role: "hod".to_owned(),
            active: true,
        };
        directory.upsert_approver(&approver).await.expect("insert approver");
        approver.active = false;
        directory.upsert_approver(&approver).await.expect("deactivate approver");

        let loaded = directory.find_notice(&notice.notice_id).await.expect("find").expect("exists");
        assert_eq!(loaded, notice);
        let loaded =
            directory.find_approver(&approver.approver_id).await.expect("find").expect("exists");
        assert!(!loaded.active);
        assert!(directory
            .find_notice(&NoticeId("N-unknown".to_owned()))
            .await
            .expect("find")
            .is_none());
    }
}
