//! Postgres-backed stores. Queries are written against the schema in
//! `migrations/`; message bodies persist as split columns so plaintext
//! rows stay searchable with ILIKE while envelopes keep their parts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{
    ConversationStore, MessageStore, NewMessage, PageQuery, ParticipantSeed, SEARCH_DECRYPT_CAP,
};
use crate::error::AppError;
use crate::models::conversation::{
    direct_pair_key, Conversation, ConversationContext, ConversationType, ContextKind,
    MessagePreview, Participant,
};
use crate::models::message::{
    Attachment, EncryptedBody, Message, MessageBody, MessageType, Reaction, ReadReceipt,
};
use crate::services::codec::MessageCodec;
use crate::services::identity::Role;

pub struct PgMessageStore {
    db: Pool<Postgres>,
    codec: Arc<MessageCodec>,
}

impl PgMessageStore {
    pub fn new(db: Pool<Postgres>, codec: Arc<MessageCodec>) -> Self {
        Self { db, codec }
    }

    fn body_from_row(row: &PgRow) -> MessageBody {
        let kind: String = row.get("body_kind");
        if kind == "encrypted" {
            MessageBody::Encrypted(EncryptedBody {
                ciphertext: row.get::<Option<String>, _>("ciphertext").unwrap_or_default(),
                iv: row.get::<Option<String>, _>("iv").unwrap_or_default(),
                tag: row.get::<Option<String>, _>("auth_tag").unwrap_or_default(),
                algorithm: row.get::<Option<String>, _>("algorithm").unwrap_or_default(),
            })
        } else {
            MessageBody::Plain {
                content: row.get::<Option<String>, _>("content").unwrap_or_default(),
            }
        }
    }

    fn message_from_row(row: &PgRow) -> Message {
        let attachment = row
            .get::<Option<String>, _>("attachment_filename")
            .map(|filename| Attachment {
                filename,
                mimetype: row
                    .get::<Option<String>, _>("attachment_mimetype")
                    .unwrap_or_default(),
                size: row.get::<Option<i64>, _>("attachment_size").unwrap_or(0),
                url: row
                    .get::<Option<String>, _>("attachment_url")
                    .unwrap_or_default(),
            });

        let original_body = row
            .get::<Option<JsonValue>, _>("original_body")
            .and_then(|v| serde_json::from_value(v).ok());

        let message_type: String = row.get("message_type");

        Message {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            body: Self::body_from_row(row),
            message_type: MessageType::parse(&message_type),
            attachment,
            reply_to: row.get("reply_to"),
            mentions: row.get("mentions"),
            reactions: vec![],
            read_by: vec![],
            is_edited: row.get("is_edited"),
            edited_at: row.get("edited_at"),
            original_body,
            is_deleted: row.get("is_deleted"),
            deleted_at: row.get("deleted_at"),
            deleted_by: row.get("deleted_by"),
            created_at: row.get("created_at"),
        }
    }

    /// Loads reactions and read receipts for the given messages in two
    /// batched queries.
    async fn attach_meta(&self, messages: &mut [Message]) -> Result<(), AppError> {
        if messages.is_empty() {
            return Ok(());
        }
        let ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let reaction_rows = sqlx::query(
            "SELECT message_id, user_id, emoji, reacted_at FROM message_reactions \
             WHERE message_id = ANY($1) ORDER BY reacted_at",
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let read_rows = sqlx::query(
            "SELECT message_id, user_id, read_at FROM message_reads \
             WHERE message_id = ANY($1) ORDER BY read_at",
        )
        .bind(&ids)
        .fetch_all(&self.db)
        .await?;

        let mut reactions: HashMap<Uuid, Vec<Reaction>> = HashMap::new();
        for row in reaction_rows {
            reactions
                .entry(row.get("message_id"))
                .or_default()
                .push(Reaction {
                    emoji: row.get("emoji"),
                    user_id: row.get("user_id"),
                    reacted_at: row.get("reacted_at"),
                });
        }
        let mut reads: HashMap<Uuid, Vec<ReadReceipt>> = HashMap::new();
        for row in read_rows {
            reads
                .entry(row.get("message_id"))
                .or_default()
                .push(ReadReceipt {
                    user_id: row.get("user_id"),
                    read_at: row.get("read_at"),
                });
        }

        for message in messages.iter_mut() {
            if let Some(r) = reactions.remove(&message.id) {
                message.reactions = r;
            }
            if let Some(r) = reads.remove(&message.id) {
                message.read_by = r;
            }
        }
        Ok(())
    }

    async fn fetch_one(&self, message_id: Uuid) -> Result<Message, AppError> {
        self.get(message_id)
            .await?
            .ok_or(AppError::NotFound("message"))
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, body_kind, content, ciphertext, \
     iv, auth_tag, algorithm, message_type, attachment_filename, attachment_mimetype, \
     attachment_size, attachment_url, reply_to, mentions, is_edited, edited_at, original_body, \
     is_deleted, deleted_at, deleted_by, created_at";

fn body_columns(body: &MessageBody) -> (&'static str, Option<&str>, Option<&EncryptedBody>) {
    match body {
        MessageBody::Plain { content } => ("plain", Some(content.as_str()), None),
        MessageBody::Encrypted(env) => ("encrypted", None, Some(env)),
    }
}

/// Escapes LIKE metacharacters so user queries match literally.
fn like_pattern(query: &str) -> String {
    let escaped = query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, new: NewMessage) -> Result<Message, AppError> {
        let id = Uuid::new_v4();
        let created_at = Utc::now();
        let (kind, content, env) = body_columns(&new.body);

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_id, body_kind, content, \
             ciphertext, iv, auth_tag, algorithm, message_type, attachment_filename, \
             attachment_mimetype, attachment_size, attachment_url, reply_to, mentions, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)",
        )
        .bind(id)
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(kind)
        .bind(content)
        .bind(env.map(|e| e.ciphertext.as_str()))
        .bind(env.map(|e| e.iv.as_str()))
        .bind(env.map(|e| e.tag.as_str()))
        .bind(env.map(|e| e.algorithm.as_str()))
        .bind(new.message_type.as_str())
        .bind(new.attachment.as_ref().map(|a| a.filename.as_str()))
        .bind(new.attachment.as_ref().map(|a| a.mimetype.as_str()))
        .bind(new.attachment.as_ref().map(|a| a.size))
        .bind(new.attachment.as_ref().map(|a| a.url.as_str()))
        .bind(new.reply_to)
        .bind(&new.mentions)
        .bind(created_at)
        .execute(&self.db)
        .await?;

        Ok(Message {
            id,
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            body: new.body,
            message_type: new.message_type,
            attachment: new.attachment,
            reply_to: new.reply_to,
            mentions: new.mentions,
            reactions: vec![],
            read_by: vec![],
            is_edited: false,
            edited_at: None,
            original_body: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at,
        })
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<Message>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(message_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let mut messages = vec![Self::message_from_row(&row)];
                self.attach_meta(&mut messages).await?;
                Ok(messages.pop())
            }
            None => Ok(None),
        }
    }

    async fn edit(&self, message_id: Uuid, body: MessageBody) -> Result<Message, AppError> {
        let mut tx = self.db.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 FOR UPDATE"
        ))
        .bind(message_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("message"))?;
        let current = Self::message_from_row(&row);

        let original = if current.is_edited {
            current.original_body.clone()
        } else {
            Some(current.body.clone())
        };
        let original_json = original
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|_| AppError::Internal)?;
        let (kind, content, env) = body_columns(&body);

        sqlx::query(
            "UPDATE messages SET body_kind = $2, content = $3, ciphertext = $4, iv = $5, \
             auth_tag = $6, algorithm = $7, is_edited = TRUE, edited_at = $8, original_body = $9 \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(kind)
        .bind(content)
        .bind(env.map(|e| e.ciphertext.as_str()))
        .bind(env.map(|e| e.iv.as_str()))
        .bind(env.map(|e| e.tag.as_str()))
        .bind(env.map(|e| e.algorithm.as_str()))
        .bind(Utc::now())
        .bind(original_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        self.fetch_one(message_id).await
    }

    async fn soft_delete(&self, message_id: Uuid, deleted_by: Uuid) -> Result<Message, AppError> {
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = TRUE, deleted_at = $2, deleted_by = $3 \
             WHERE id = $1",
        )
        .bind(message_id)
        .bind(Utc::now())
        .bind(deleted_by)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("message"));
        }
        self.fetch_one(message_id).await
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(Message, bool), AppError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM messages WHERE id = $1)")
                .bind(message_id)
                .fetch_one(&self.db)
                .await?;
        if !exists {
            return Err(AppError::NotFound("message"));
        }

        let inserted = sqlx::query(
            "INSERT INTO message_reactions (message_id, user_id, emoji, reacted_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
        )
        .bind(message_id)
        .bind(user_id)
        .bind(emoji)
        .bind(Utc::now())
        .execute(&self.db)
        .await?
        .rows_affected();

        let added = inserted > 0;
        if !added {
            sqlx::query(
                "DELETE FROM message_reactions \
                 WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
            )
            .bind(message_id)
            .bind(user_id)
            .bind(emoji)
            .execute(&self.db)
            .await?;
        }

        let message = self.fetch_one(message_id).await?;
        Ok((message, added))
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, read_at) \
             SELECT m.id, $2, $3 FROM messages m \
             WHERE m.conversation_id = $1 AND m.sender_id <> $2 \
             ON CONFLICT (message_id, user_id) DO NOTHING \
             RETURNING message_id",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("message_id")).collect())
    }

    async fn mark_read_many(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = message_ids.to_vec();
        let rows = sqlx::query(
            "INSERT INTO message_reads (message_id, user_id, read_at) \
             SELECT m.id, $2, $3 FROM messages m \
             WHERE m.id = ANY($1) AND m.sender_id <> $2 \
             ON CONFLICT (message_id, user_id) DO NOTHING \
             RETURNING message_id",
        )
        .bind(&ids)
        .bind(user_id)
        .bind(at)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(|r| r.get("message_id")).collect())
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        query: PageQuery,
    ) -> Result<Vec<Message>, AppError> {
        // tombstoned rows stay in the page; the service hides their bodies
        let rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = $1 \
               AND ($2::timestamptz IS NULL OR created_at < $2) \
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(conversation_id)
        .bind(query.before)
        .bind(query.limit.max(0))
        .fetch_all(&self.db)
        .await?;

        let mut messages: Vec<Message> = rows.iter().map(Self::message_from_row).collect();
        self.attach_meta(&mut messages).await?;
        Ok(messages)
    }

    async fn search(
        &self,
        conversation_ids: &[Uuid],
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        if conversation_ids.is_empty() || query.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<Uuid> = conversation_ids.to_vec();

        // plaintext rows match directly in SQL
        let plain_rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE conversation_id = ANY($1) AND is_deleted = FALSE \
               AND body_kind = 'plain' AND content ILIKE $2 \
             ORDER BY created_at DESC"
        ))
        .bind(&ids)
        .bind(like_pattern(query))
        .fetch_all(&self.db)
        .await?;

        // encrypted rows need a bounded decrypt pass, newest first
        let encrypted_rows = sqlx::query(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM ( \
                 SELECT *, ROW_NUMBER() OVER ( \
                     PARTITION BY conversation_id ORDER BY created_at DESC \
                 ) AS rn \
                 FROM messages \
                 WHERE conversation_id = ANY($1) AND is_deleted = FALSE \
                   AND body_kind = 'encrypted' \
             ) ranked WHERE rn <= $2"
        ))
        .bind(&ids)
        .bind(SEARCH_DECRYPT_CAP)
        .fetch_all(&self.db)
        .await?;

        let needle = query.to_lowercase();
        let mut messages: Vec<Message> = plain_rows.iter().map(Self::message_from_row).collect();
        for row in &encrypted_rows {
            let message = Self::message_from_row(row);
            if let Some(plain) = self.codec.try_decode(&message.body) {
                if plain.to_lowercase().contains(&needle) {
                    messages.push(message);
                }
            }
        }

        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit.max(0) as usize);
        self.attach_meta(&mut messages).await?;
        Ok(messages)
    }
}

pub struct PgConversationStore {
    db: Pool<Postgres>,
}

impl PgConversationStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    fn conversation_from_row(row: &PgRow, participants: Vec<Participant>) -> Conversation {
        let kind: String = row.get("kind");
        let context_kind: String = row.get("context_kind");
        let last_message = row
            .get::<Option<String>, _>("preview_content")
            .map(|content| MessagePreview {
                content,
                sender_id: row.get("preview_sender"),
                timestamp: row.get("preview_at"),
                message_type: MessageType::parse(
                    &row.get::<Option<String>, _>("preview_type").unwrap_or_default(),
                ),
            });

        Conversation {
            id: row.get("id"),
            kind: if kind == "group" {
                ConversationType::Group
            } else {
                ConversationType::Direct
            },
            title: row.get("title"),
            participants,
            last_message,
            context: ConversationContext {
                kind: ContextKind::parse(&context_kind),
                related_entity: row.get("related_entity"),
            },
            is_active: row.get("is_active"),
            created_by: row.get("created_by"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }

    async fn load_participants(
        &self,
        conversation_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Participant>>, AppError> {
        let rows = sqlx::query(
            "SELECT conversation_id, user_id, role, joined_at, last_seen_at, unread_count \
             FROM conversation_participants WHERE conversation_id = ANY($1) ORDER BY joined_at",
        )
        .bind(conversation_ids)
        .fetch_all(&self.db)
        .await?;

        let mut out: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for row in rows {
            let role: String = row.get("role");
            out.entry(row.get("conversation_id"))
                .or_default()
                .push(Participant {
                    user_id: row.get("user_id"),
                    role: Role::parse(&role).unwrap_or(Role::Agent),
                    joined_at: row.get("joined_at"),
                    last_seen_at: row.get("last_seen_at"),
                    unread_count: row.get("unread_count"),
                });
        }
        Ok(out)
    }

    async fn hydrate(&self, conversation_id: Uuid) -> Result<Conversation, AppError> {
        self.get(conversation_id)
            .await?
            .ok_or(AppError::NotFound("conversation"))
    }

    async fn insert_participant(
        &self,
        conversation_id: Uuid,
        seed: ParticipantSeed,
    ) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO conversation_participants \
             (conversation_id, user_id, role, joined_at, last_seen_at, unread_count) \
             VALUES ($1, $2, $3, NOW(), NOW(), 0) \
             ON CONFLICT (conversation_id, user_id) DO NOTHING",
        )
        .bind(conversation_id)
        .bind(seed.user_id)
        .bind(seed.role.as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

const CONVERSATION_COLUMNS: &str = "id, kind, title, direct_key, context_kind, related_entity, \
     is_active, created_by, created_at, updated_at, preview_content, preview_sender, \
     preview_at, preview_type";

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_or_create_direct(
        &self,
        a: ParticipantSeed,
        b: ParticipantSeed,
        context: ConversationContext,
    ) -> Result<(Conversation, bool), AppError> {
        let (lo, hi) = direct_pair_key(a.user_id, b.user_id);
        let direct_key = format!("{lo}:{hi}");
        let id = Uuid::new_v4();

        // the unique index on direct_key makes concurrent creation converge
        // on a single row
        let inserted = sqlx::query(
            "INSERT INTO conversations \
             (id, kind, direct_key, context_kind, related_entity, is_active, created_by, \
              created_at, updated_at) \
             VALUES ($1, 'direct', $2, $3, $4, TRUE, $5, NOW(), NOW()) \
             ON CONFLICT (direct_key) DO NOTHING",
        )
        .bind(id)
        .bind(&direct_key)
        .bind(context.kind.as_str())
        .bind(context.related_entity)
        .bind(a.user_id)
        .execute(&self.db)
        .await?
        .rows_affected();

        if inserted > 0 {
            self.insert_participant(id, a).await?;
            self.insert_participant(id, b).await?;
            return Ok((self.hydrate(id).await?, true));
        }

        let existing_id: Uuid =
            sqlx::query_scalar("SELECT id FROM conversations WHERE direct_key = $1")
                .bind(&direct_key)
                .fetch_one(&self.db)
                .await?;
        Ok((self.hydrate(existing_id).await?, false))
    }

    async fn create_group(
        &self,
        title: &str,
        creator: ParticipantSeed,
        members: Vec<ParticipantSeed>,
        context: ConversationContext,
    ) -> Result<Conversation, AppError> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO conversations \
             (id, kind, title, context_kind, related_entity, is_active, created_by, \
              created_at, updated_at) \
             VALUES ($1, 'group', $2, $3, $4, TRUE, $5, NOW(), NOW())",
        )
        .bind(id)
        .bind(title)
        .bind(context.kind.as_str())
        .bind(context.related_entity)
        .bind(creator.user_id)
        .execute(&self.db)
        .await?;

        self.insert_participant(id, creator).await?;
        for seed in members {
            self.insert_participant(id, seed).await?;
        }
        self.hydrate(id).await
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.db)
        .await?;

        match row {
            Some(row) => {
                let mut participants = self.load_participants(&[conversation_id]).await?;
                Ok(Some(Self::conversation_from_row(
                    &row,
                    participants.remove(&conversation_id).unwrap_or_default(),
                )))
            }
            None => Ok(None),
        }
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        kind: Option<ContextKind>,
    ) -> Result<Vec<Conversation>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations c \
             WHERE c.is_active = TRUE \
               AND EXISTS (SELECT 1 FROM conversation_participants p \
                           WHERE p.conversation_id = c.id AND p.user_id = $1) \
               AND ($2::text IS NULL OR c.context_kind = $2) \
             ORDER BY c.updated_at DESC"
        ))
        .bind(user_id)
        .bind(kind.map(|k| k.as_str()))
        .fetch_all(&self.db)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get("id")).collect();
        let mut participants = self.load_participants(&ids).await?;

        Ok(rows
            .iter()
            .map(|row| {
                let id: Uuid = row.get("id");
                Self::conversation_from_row(row, participants.remove(&id).unwrap_or_default())
            })
            .collect())
    }

    async fn increment_unread(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, AppError> {
        let rows = sqlx::query(
            "UPDATE conversation_participants SET unread_count = unread_count + 1 \
             WHERE conversation_id = $1 AND user_id <> $2 \
             RETURNING user_id, unread_count",
        )
        .bind(conversation_id)
        .bind(sender_id)
        .fetch_all(&self.db)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get("user_id"), r.get("unread_count")))
            .collect())
    }

    async fn mark_seen(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            "UPDATE conversation_participants SET unread_count = 0, last_seen_at = $3 \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("participant"));
        }
        Ok(())
    }

    async fn update_preview(
        &self,
        conversation_id: Uuid,
        preview: MessagePreview,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE conversations SET preview_content = $2, preview_sender = $3, \
             preview_at = $4, preview_type = $5, updated_at = NOW() WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(&preview.content)
        .bind(preview.sender_id)
        .bind(preview.timestamp)
        .bind(preview.message_type.as_str())
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn rename(
        &self,
        conversation_id: Uuid,
        title: &str,
    ) -> Result<Conversation, AppError> {
        let result =
            sqlx::query("UPDATE conversations SET title = $2, updated_at = NOW() WHERE id = $1")
                .bind(conversation_id)
                .bind(title)
                .execute(&self.db)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        self.hydrate(conversation_id).await
    }

    async fn add_participants(
        &self,
        conversation_id: Uuid,
        members: Vec<ParticipantSeed>,
    ) -> Result<Conversation, AppError> {
        for seed in members {
            self.insert_participant(conversation_id, seed).await?;
        }
        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        self.hydrate(conversation_id).await
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, AppError> {
        sqlx::query(
            "DELETE FROM conversation_participants \
             WHERE conversation_id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        self.hydrate(conversation_id).await
    }

    async fn deactivate(&self, conversation_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE conversations SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn total_unread(&self, user_id: Uuid) -> Result<i64, AppError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(p.unread_count), 0)::bigint \
             FROM conversation_participants p \
             JOIN conversations c ON c.id = p.conversation_id \
             WHERE p.user_id = $1 AND c.is_active = TRUE",
        )
        .bind(user_id)
        .fetch_one(&self.db)
        .await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::like_pattern;

    #[test]
    fn like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("100%"), "%100\\%%");
        assert_eq!(like_pattern("under_score"), "%under\\_score%");
        assert_eq!(like_pattern("back\\slash"), "%back\\\\slash%");
    }
}
