pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::{
    Conversation, ConversationContext, ContextKind, MessagePreview,
};
use crate::models::message::{Attachment, Message, MessageBody, MessageType};
use crate::services::identity::Role;

/// Per-conversation search scans at most this many encrypted candidates in
/// the decrypt pass; plaintext matching is unbounded by comparison.
pub const SEARCH_DECRYPT_CAP: i64 = 200;

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: MessageBody,
    pub message_type: MessageType,
    pub attachment: Option<Attachment>,
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy)]
pub struct PageQuery {
    pub limit: i64,
    pub before: Option<DateTime<Utc>>,
}

impl Default for PageQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            before: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParticipantSeed {
    pub user_id: Uuid,
    pub role: Role,
}

/// Message persistence. Implementations own at-rest encryption: bodies
/// arrive already encoded from the service, but search needs the codec to
/// run its decrypt pass over stored envelopes.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, new: NewMessage) -> Result<Message, AppError>;

    async fn get(&self, message_id: Uuid) -> Result<Option<Message>, AppError>;

    /// Replaces the body, capturing the pre-edit body into `original_body`
    /// on the first edit only.
    async fn edit(&self, message_id: Uuid, body: MessageBody) -> Result<Message, AppError>;

    /// Tombstones the message. The row survives for history; its body is
    /// no longer served.
    async fn soft_delete(&self, message_id: Uuid, deleted_by: Uuid) -> Result<Message, AppError>;

    /// Adds the reaction if the (user, emoji) pair is absent, removes it if
    /// present. Returns the updated message and whether it was added.
    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(Message, bool), AppError>;

    /// Marks every message in the conversation not yet read by `user_id`
    /// (and not sent by them) as read. Returns the ids affected.
    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;

    /// Records read receipts for the given messages on behalf of `user_id`,
    /// skipping their own messages and ones already read. Returns the ids
    /// affected.
    async fn mark_read_many(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError>;

    /// Newest-first page of messages strictly older than `before` when set.
    /// Tombstoned rows are included so clients can render deletion
    /// placeholders; their bodies are redacted further up.
    async fn page(
        &self,
        conversation_id: Uuid,
        query: PageQuery,
    ) -> Result<Vec<Message>, AppError>;

    /// Case-insensitive substring search across the given conversations.
    /// Plaintext rows are matched in place; encrypted rows are decrypted
    /// and filtered, capped per conversation. Results are merged newest
    /// first and truncated to `limit`. Tombstoned rows never match.
    async fn search(
        &self,
        conversation_ids: &[Uuid],
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>, AppError>;
}

/// Conversation persistence, including the denormalized unread counters
/// and last-message preview.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Returns the existing direct conversation for the pair or creates
    /// one. The bool is true when a new conversation was created.
    async fn find_or_create_direct(
        &self,
        a: ParticipantSeed,
        b: ParticipantSeed,
        context: ConversationContext,
    ) -> Result<(Conversation, bool), AppError>;

    async fn create_group(
        &self,
        title: &str,
        creator: ParticipantSeed,
        members: Vec<ParticipantSeed>,
        context: ConversationContext,
    ) -> Result<Conversation, AppError>;

    async fn get(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError>;

    /// Active conversations the user participates in, most recently
    /// updated first, optionally filtered by context kind.
    async fn list_for_user(
        &self,
        user_id: Uuid,
        kind: Option<ContextKind>,
    ) -> Result<Vec<Conversation>, AppError>;

    /// Bumps unread for every participant except the sender. Returns the
    /// new (user, count) pairs for fan-out.
    async fn increment_unread(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, AppError>;

    /// Zeroes the user's unread counter and stamps last_seen_at. The only
    /// path that decreases unread.
    async fn mark_seen(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn update_preview(
        &self,
        conversation_id: Uuid,
        preview: MessagePreview,
    ) -> Result<(), AppError>;

    async fn rename(&self, conversation_id: Uuid, title: &str)
        -> Result<Conversation, AppError>;

    async fn add_participants(
        &self,
        conversation_id: Uuid,
        members: Vec<ParticipantSeed>,
    ) -> Result<Conversation, AppError>;

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, AppError>;

    async fn deactivate(&self, conversation_id: Uuid) -> Result<(), AppError>;

    /// Sum of unread counters across the user's active conversations.
    async fn total_unread(&self, user_id: Uuid) -> Result<i64, AppError>;
}
