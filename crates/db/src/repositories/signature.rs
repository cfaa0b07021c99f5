use sqlx::Row;

use noticeboard_core::domain::approval::RecordId;
use noticeboard_core::domain::notice::UserId;
use noticeboard_core::domain::signature::{SignatureBlob, SignatureRef};

use super::{conflict_or_database, format_timestamp, parse_timestamp, RepositoryError, SignatureRepository};
use crate::DbPool;

pub struct SqlSignatureRepository {
    pool: DbPool,
}

impl SqlSignatureRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SignatureRepository for SqlSignatureRepository {
    async fn insert(&self, blob: &SignatureBlob) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO signature_blob
                (signature_ref, content_type, sha256_hex, byte_len, bytes, captured_by, captured_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&blob.signature_ref.0)
        .bind(&blob.content_type)
        .bind(&blob.sha256_hex)
        .bind(i64::try_from(blob.byte_len()).unwrap_or(i64::MAX))
        .bind(&blob.bytes)
        .bind(blob.captured_by.as_ref().map(|user| user.0.clone()))
        .bind(format_timestamp(&blob.captured_at))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            conflict_or_database(error, &format!("signature `{}` already exists", blob.signature_ref))
        })?;
        Ok(())
    }

    async fn find(
        &self,
        signature_ref: &SignatureRef,
    ) -> Result<Option<SignatureBlob>, RepositoryError> {
        let row = sqlx::query(
            "SELECT signature_ref, content_type, sha256_hex, bytes, captured_by, captured_at
             FROM signature_blob
             WHERE signature_ref = ?",
        )
        .bind(&signature_ref.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(SignatureBlob {
                signature_ref: SignatureRef(row.try_get("signature_ref")?),
                content_type: row.try_get("content_type")?,
                sha256_hex: row.try_get("sha256_hex")?,
                bytes: row.try_get("bytes")?,
                captured_by: row.try_get::<Option<String>, _>("captured_by")?.map(UserId),
                captured_at: parse_timestamp("captured_at", row.try_get("captured_at")?)?,
            })
        })
        .transpose()
    }

    async fn find_binding(
        &self,
        signature_ref: &SignatureRef,
    ) -> Result<Option<RecordId>, RepositoryError> {
        let record_id: Option<String> =
            sqlx::query_scalar("SELECT record_id FROM approval_step WHERE signature_ref = ?")
                .bind(&signature_ref.0)
                .fetch_optional(&self.pool)
                .await?;
        Ok(record_id.map(RecordId))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use noticeboard_core::domain::notice::UserId;
    use noticeboard_core::domain::signature::{SignatureBlob, SignatureRef};

    use super::SqlSignatureRepository;
    use crate::repositories::{RepositoryError, SignatureRepository};
    use crate::{connect_with_settings, migrations};

    fn blob() -> SignatureBlob {
        SignatureBlob {
            signature_ref: SignatureRef::generate(),
            content_type: "image/png".to_owned(),
            sha256_hex: "00ff".to_owned(),
            bytes: vec![0x89, b'P', b'N', b'G', 1, 2, 3],
            captured_by: Some(UserId("emp-a".to_owned())),
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn stored_blob_is_returned_byte_for_byte() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlSignatureRepository::new(pool);
        let blob = blob();

        repo.insert(&blob).await.expect("insert");
        let loaded = repo.find(&blob.signature_ref).await.expect("find").expect("exists");

        assert_eq!(loaded.bytes, blob.bytes);
        assert_eq!(loaded.content_type, "image/png");
        assert_eq!(loaded.captured_by, blob.captured_by);
        assert!(repo.find_binding(&blob.signature_ref).await.expect("binding").is_none());
        assert!(repo.find(&SignatureRef("SIG-missing".to_owned())).await.expect("find").is_none());
    }

    #[tokio::test]
    async fn duplicate_reference_is_a_conflict() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        let repo = SqlSignatureRepository::new(pool);
        let blob = blob();

        repo.insert(&blob).await.expect("insert");
        let error = repo.insert(&blob).await.expect_err("duplicate");
        assert!(matches!(error, RepositoryError::Conflict(_)));
    }
}
