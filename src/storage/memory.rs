//! In-memory stores backing unit and flow tests. They honor the same
//! contracts as the Postgres stores so service logic can be exercised
//! without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ConversationStore, MessageStore, NewMessage, PageQuery, ParticipantSeed, SEARCH_DECRYPT_CAP,
};
use crate::error::AppError;
use crate::models::conversation::{
    direct_pair_key, Conversation, ConversationContext, ConversationType, ContextKind,
    MessagePreview, Participant,
};
use crate::models::message::{Message, MessageBody, Reaction, ReadReceipt};
use crate::services::codec::MessageCodec;

#[derive(Default)]
struct MessagesInner {
    messages: HashMap<Uuid, Message>,
    // insertion order per conversation, oldest first
    by_conversation: HashMap<Uuid, Vec<Uuid>>,
}

pub struct InMemoryMessageStore {
    codec: Arc<MessageCodec>,
    inner: RwLock<MessagesInner>,
}

impl InMemoryMessageStore {
    pub fn new(codec: Arc<MessageCodec>) -> Self {
        Self {
            codec,
            inner: RwLock::new(MessagesInner::default()),
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, new: NewMessage) -> Result<Message, AppError> {
        let message = Message {
            id: Uuid::new_v4(),
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
            created_at: Utc::now(),
        };

        let mut inner = self.inner.write().await;
        inner
            .by_conversation
            .entry(message.conversation_id)
            .or_default()
            .push(message.id);
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<Message>, AppError> {
        Ok(self.inner.read().await.messages.get(&message_id).cloned())
    }

    async fn edit(&self, message_id: Uuid, body: MessageBody) -> Result<Message, AppError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(AppError::NotFound("message"))?;

        if !message.is_edited {
            message.original_body = Some(message.body.clone());
        }
        message.body = body;
        message.is_edited = true;
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
    }

    async fn soft_delete(&self, message_id: Uuid, deleted_by: Uuid) -> Result<Message, AppError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(AppError::NotFound("message"))?;

        message.is_deleted = true;
        message.deleted_at = Some(Utc::now());
        message.deleted_by = Some(deleted_by);
        Ok(message.clone())
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> Result<(Message, bool), AppError> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(AppError::NotFound("message"))?;

        let existing = message
            .reactions
            .iter()
            .position(|r| r.user_id == user_id && r.emoji == emoji);
        let added = match existing {
            Some(idx) => {
                message.reactions.remove(idx);
                false
            }
            None => {
                message.reactions.push(Reaction {
                    emoji: emoji.to_string(),
                    user_id,
                    reacted_at: Utc::now(),
                });
                true
            }
        };
        Ok((message.clone(), added))
    }

    async fn mark_read(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut inner = self.inner.write().await;
        let ids: Vec<Uuid> = inner
            .by_conversation
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();

        let mut affected = Vec::new();
        for id in ids {
            if let Some(message) = inner.messages.get_mut(&id) {
                if message.sender_id != user_id && !message.is_read_by(user_id) {
                    message.read_by.push(ReadReceipt {
                        user_id,
                        read_at: at,
                    });
                    affected.push(id);
                }
            }
        }
        Ok(affected)
    }

    async fn mark_read_many(
        &self,
        message_ids: &[Uuid],
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, AppError> {
        let mut inner = self.inner.write().await;
        let mut affected = Vec::new();
        for id in message_ids {
            if let Some(message) = inner.messages.get_mut(id) {
                if message.sender_id != user_id && !message.is_read_by(user_id) {
                    message.read_by.push(ReadReceipt {
                        user_id,
                        read_at: at,
                    });
                    affected.push(*id);
                }
            }
        }
        Ok(affected)
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        query: PageQuery,
    ) -> Result<Vec<Message>, AppError> {
        let inner = self.inner.read().await;
        let ids = inner
            .by_conversation
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();

        // tombstoned rows stay in the page; the service hides their bodies
        let mut out: Vec<Message> = ids
            .iter()
            .rev()
            .filter_map(|id| inner.messages.get(id))
            .filter(|m| query.before.map_or(true, |b| m.created_at < b))
            .take(query.limit.max(0) as usize)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn search(
        &self,
        conversation_ids: &[Uuid],
        query: &str,
        limit: i64,
    ) -> Result<Vec<Message>, AppError> {
        let needle = query.to_lowercase();
        let inner = self.inner.read().await;
        let mut out = Vec::new();

        for conv_id in conversation_ids {
            let ids = match inner.by_conversation.get(conv_id) {
                Some(ids) => ids,
                None => continue,
            };
            let mut scanned = 0i64;
            for id in ids.iter().rev() {
                let Some(message) = inner.messages.get(id) else {
                    continue;
                };
                if message.is_deleted {
                    continue;
                }
                match &message.body {
                    MessageBody::Plain { content } => {
                        if content.to_lowercase().contains(&needle) {
                            out.push(message.clone());
                        }
                    }
                    MessageBody::Encrypted(_) => {
                        if scanned >= SEARCH_DECRYPT_CAP {
                            continue;
                        }
                        scanned += 1;
                        if let Some(plain) = self.codec.try_decode(&message.body) {
                            if plain.to_lowercase().contains(&needle) {
                                out.push(message.clone());
                            }
                        }
                    }
                }
            }
        }

        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }
}

#[derive(Default)]
struct ConversationsInner {
    conversations: HashMap<Uuid, Conversation>,
    direct_index: HashMap<(Uuid, Uuid), Uuid>,
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    inner: RwLock<ConversationsInner>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn find_or_create_direct(
        &self,
        a: ParticipantSeed,
        b: ParticipantSeed,
        context: ConversationContext,
    ) -> Result<(Conversation, bool), AppError> {
        let key = direct_pair_key(a.user_id, b.user_id);
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.direct_index.get(&key) {
            let existing = inner
                .conversations
                .get(id)
                .cloned()
                .ok_or(AppError::NotFound("conversation"))?;
            return Ok((existing, false));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationType::Direct,
            title: None,
            participants: vec![
                Participant::new(a.user_id, a.role),
                Participant::new(b.user_id, b.role),
            ],
            last_message: None,
            context,
            is_active: true,
            created_by: a.user_id,
            created_at: now,
            updated_at: now,
        };
        inner.direct_index.insert(key, conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok((conversation, true))
    }

    async fn create_group(
        &self,
        title: &str,
        creator: ParticipantSeed,
        members: Vec<ParticipantSeed>,
        context: ConversationContext,
    ) -> Result<Conversation, AppError> {
        let mut participants = vec![Participant::new(creator.user_id, creator.role)];
        for seed in members {
            if participants.iter().all(|p| p.user_id != seed.user_id) {
                participants.push(Participant::new(seed.user_id, seed.role));
            }
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationType::Group,
            title: Some(title.to_string()),
            participants,
            last_message: None,
            context,
            is_active: true,
            created_by: creator.user_id,
            created_at: now,
            updated_at: now,
        };
        self.inner
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn get(&self, conversation_id: Uuid) -> Result<Option<Conversation>, AppError> {
        Ok(self
            .inner
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        kind: Option<ContextKind>,
    ) -> Result<Vec<Conversation>, AppError> {
        let inner = self.inner.read().await;
        let mut out: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_active && c.is_participant(user_id))
            .filter(|c| kind.map_or(true, |k| c.context.kind == k))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn increment_unread(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Vec<(Uuid, i32)>, AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;

        let mut updated = Vec::new();
        for participant in conversation
            .participants
            .iter_mut()
            .filter(|p| p.user_id != sender_id)
        {
            participant.unread_count += 1;
            updated.push((participant.user_id, participant.unread_count));
        }
        conversation.updated_at = Utc::now();
        Ok(updated)
    }

    async fn mark_seen(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;
        let participant = conversation
            .participants
            .iter_mut()
            .find(|p| p.user_id == user_id)
            .ok_or(AppError::NotFound("participant"))?;

        participant.unread_count = 0;
        participant.last_seen_at = at;
        Ok(())
    }

    async fn update_preview(
        &self,
        conversation_id: Uuid,
        preview: MessagePreview,
    ) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;
        conversation.last_message = Some(preview);
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn rename(
        &self,
        conversation_id: Uuid,
        title: &str,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;
        conversation.title = Some(title.to_string());
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn add_participants(
        &self,
        conversation_id: Uuid,
        members: Vec<ParticipantSeed>,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;

        for seed in members {
            if !conversation.is_participant(seed.user_id) {
                conversation
                    .participants
                    .push(Participant::new(seed.user_id, seed.role));
            }
        }
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn remove_participant(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> Result<Conversation, AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;

        conversation.participants.retain(|p| p.user_id != user_id);
        conversation.updated_at = Utc::now();
        Ok(conversation.clone())
    }

    async fn deactivate(&self, conversation_id: Uuid) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;
        conversation.is_active = false;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn total_unread(&self, user_id: Uuid) -> Result<i64, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .filter(|c| c.is_active)
            .filter_map(|c| c.participant(user_id))
            .map(|p| p.unread_count as i64)
            .sum())
    }
}
