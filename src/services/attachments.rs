use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::message::Attachment;

#[derive(Debug, Clone)]
pub struct AttachmentMeta {
    pub owner_id: Uuid,
    pub filename: String,
    pub mimetype: String,
    pub size: i64,
    pub url: String,
}

impl AttachmentMeta {
    pub fn into_attachment(self) -> Attachment {
        Attachment {
            filename: self.filename,
            mimetype: self.mimetype,
            size: self.size,
            url: self.url,
        }
    }
}

/// File metadata lookup for messages carrying an attachment. Upload and
/// storage live in a separate service; this side only reads metadata and
/// records usage.
#[async_trait]
pub trait AttachmentService: Send + Sync {
    async fn get_meta(&self, attachment_id: Uuid) -> Result<Option<AttachmentMeta>, AppError>;
    async fn increment_usage(&self, attachment_id: Uuid) -> Result<(), AppError>;
}

pub struct PgAttachmentService {
    db: Pool<Postgres>,
}

impl PgAttachmentService {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AttachmentService for PgAttachmentService {
    async fn get_meta(&self, attachment_id: Uuid) -> Result<Option<AttachmentMeta>, AppError> {
        let row = sqlx::query(
            "SELECT owner_id, filename, mimetype, size, url FROM attachments WHERE id = $1",
        )
        .bind(attachment_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(|row| AttachmentMeta {
            owner_id: row.get("owner_id"),
            filename: row.get("filename"),
            mimetype: row.get("mimetype"),
            size: row.get("size"),
            url: row.get("url"),
        }))
    }

    async fn increment_usage(&self, attachment_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE attachments SET usage_count = usage_count + 1 WHERE id = $1")
            .bind(attachment_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}
