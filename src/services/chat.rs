//! Conversation and message orchestration. Handlers stay thin; every rule
//! about who may do what, what gets persisted, and which events fan out
//! lives here.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::{
    Conversation, ConversationContext, ConversationType, ContextKind, MessagePreview,
};
use crate::models::message::{
    parse_mentions, Attachment, Message, MessageType, Reaction, ReadReceipt,
};
use crate::realtime::events::{ChatEvent, GroupChange};
use crate::realtime::EventBus;
use crate::services::attachments::AttachmentService;
use crate::services::codec::MessageCodec;
use crate::services::identity::{Role, UserDirectory, UserProfile};
use crate::services::typing::TypingTracker;
use crate::storage::{ConversationStore, MessageStore, NewMessage, PageQuery, ParticipantSeed};

const REPLY_PREVIEW_MAX: usize = 120;
const LAST_MESSAGE_PREVIEW_MAX: usize = 200;

/// Wire shape of a message: body already decoded to plaintext, reply
/// hydrated into a short preview. Tombstoned messages keep their place in
/// the page but carry an empty content and `is_deleted: true`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub encrypted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyPreview>,
    pub mentions: Vec<Uuid>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplyPreview {
    pub message_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
}

/// Conversation as one viewer sees it: their unread counter, and for
/// direct conversations a title derived from the other participant.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationView {
    pub id: Uuid,
    pub kind: ConversationType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub participants: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_message: Option<MessagePreview>,
    pub context: ConversationContext,
    pub unread_count: i32,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SendMessage {
    pub conversation_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub attachment_id: Option<Uuid>,
    pub reply_to: Option<Uuid>,
}

#[derive(Clone)]
pub struct ChatService {
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    codec: Arc<MessageCodec>,
    directory: Arc<dyn UserDirectory>,
    attachments: Arc<dyn AttachmentService>,
    typing: TypingTracker,
    events: EventBus,
}

impl ChatService {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        codec: Arc<MessageCodec>,
        directory: Arc<dyn UserDirectory>,
        attachments: Arc<dyn AttachmentService>,
        events: EventBus,
    ) -> Self {
        Self {
            conversations,
            messages,
            codec,
            directory,
            attachments,
            typing: TypingTracker::new(),
            events,
        }
    }

    async fn require_user(&self, user_id: Uuid) -> AppResult<UserProfile> {
        self.directory
            .get_user(user_id)
            .await?
            .ok_or(AppError::NotFound("user"))
    }

    async fn require_conversation(&self, conversation_id: Uuid) -> AppResult<Conversation> {
        self.conversations
            .get(conversation_id)
            .await?
            .ok_or(AppError::NotFound("conversation"))
    }

    async fn require_membership(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self.require_conversation(conversation_id).await?;
        if !conversation.is_participant(user_id) {
            return Err(AppError::Forbidden(
                "not a participant of this conversation".into(),
            ));
        }
        Ok(conversation)
    }

    // ------------------------------------------------------------------
    // conversations
    // ------------------------------------------------------------------

    /// Opens (or returns) the one direct conversation between two users,
    /// subject to the role capability matrix.
    pub async fn open_direct(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
        context: ConversationContext,
    ) -> AppResult<ConversationView> {
        if user_id == peer_id {
            return Err(AppError::Validation(
                "cannot open a conversation with yourself".into(),
            ));
        }
        let user = self.require_user(user_id).await?;
        let peer = self.require_user(peer_id).await?;
        if !user.role.can_message(peer.role) {
            return Err(AppError::Forbidden(format!(
                "role {} may not message role {}",
                user.role.as_str(),
                peer.role.as_str()
            )));
        }

        let (conversation, created) = self
            .conversations
            .find_or_create_direct(
                ParticipantSeed {
                    user_id,
                    role: user.role,
                },
                ParticipantSeed {
                    user_id: peer_id,
                    role: peer.role,
                },
                context,
            )
            .await?;
        if created {
            tracing::info!(conversation_id = %conversation.id, "direct conversation created");
        }
        self.view_for(&conversation, user_id).await
    }

    pub async fn create_group(
        &self,
        creator_id: Uuid,
        title: &str,
        member_ids: &[Uuid],
        context: ConversationContext,
    ) -> AppResult<ConversationView> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("group title is required".into()));
        }
        let others: Vec<Uuid> = {
            let mut seen = vec![creator_id];
            member_ids
                .iter()
                .copied()
                .filter(|id| {
                    if seen.contains(id) {
                        false
                    } else {
                        seen.push(*id);
                        true
                    }
                })
                .collect()
        };
        if others.is_empty() {
            return Err(AppError::Validation(
                "a group needs at least one other member".into(),
            ));
        }

        let creator = self.require_user(creator_id).await?;
        let mut members = Vec::with_capacity(others.len());
        for id in &others {
            let profile = self.require_user(*id).await?;
            members.push(ParticipantSeed {
                user_id: profile.id,
                role: profile.role,
            });
        }

        let conversation = self
            .conversations
            .create_group(
                title,
                ParticipantSeed {
                    user_id: creator_id,
                    role: creator.role,
                },
                members,
                context,
            )
            .await?;
        tracing::info!(conversation_id = %conversation.id, "group created");

        self.post_system_message(
            &conversation,
            creator_id,
            &format!("{} created the group \"{}\"", creator.full_name, title),
        )
        .await?;
        self.broadcast_group_update(&conversation, GroupChange::Created, None)
            .await?;

        self.view_for(&conversation, creator_id).await
    }

    pub async fn list_conversations(
        &self,
        user_id: Uuid,
        kind: Option<ContextKind>,
    ) -> AppResult<Vec<ConversationView>> {
        let conversations = self.conversations.list_for_user(user_id, kind).await?;
        let mut out = Vec::with_capacity(conversations.len());
        for conversation in &conversations {
            out.push(self.view_for(conversation, user_id).await?);
        }
        Ok(out)
    }

    pub async fn get_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<ConversationView> {
        let conversation = self.require_membership(conversation_id, user_id).await?;
        self.view_for(&conversation, user_id).await
    }

    pub async fn total_unread(&self, user_id: Uuid) -> AppResult<i64> {
        self.conversations.total_unread(user_id).await
    }

    /// Closes a conversation: it drops out of listings and rejects new
    /// messages, but history stays readable. Direct conversations may be
    /// closed by either side; groups only by their manager.
    pub async fn close_conversation(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        let conversation = self.require_membership(conversation_id, user_id).await?;
        if conversation.kind == ConversationType::Group {
            self.require_group_admin(conversation_id, user_id).await?;
        }
        if !conversation.is_active {
            return Err(AppError::Conflict("conversation is already closed".into()));
        }
        self.conversations.deactivate(conversation_id).await?;
        tracing::info!(%conversation_id, %user_id, "conversation closed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // messages
    // ------------------------------------------------------------------

    pub async fn send_message(&self, sender_id: Uuid, input: SendMessage) -> AppResult<MessageView> {
        let conversation = self
            .require_membership(input.conversation_id, sender_id)
            .await?;
        if !conversation.is_active {
            return Err(AppError::Conflict("conversation is closed".into()));
        }
        if input.content.trim().is_empty() && input.attachment_id.is_none() {
            return Err(AppError::Validation("message content is required".into()));
        }
        if matches!(input.message_type, MessageType::Image | MessageType::File)
            && input.attachment_id.is_none()
        {
            return Err(AppError::Validation(
                "file and image messages need an attachment".into(),
            ));
        }
        if input.message_type == MessageType::System {
            return Err(AppError::Validation(
                "system messages cannot be sent directly".into(),
            ));
        }

        let attachment = match input.attachment_id {
            Some(attachment_id) => {
                let meta = self
                    .attachments
                    .get_meta(attachment_id)
                    .await?
                    .ok_or(AppError::NotFound("attachment"))?;
                if meta.owner_id != sender_id {
                    return Err(AppError::Forbidden("attachment belongs to another user".into()));
                }
                self.attachments.increment_usage(attachment_id).await?;
                Some(meta.into_attachment())
            }
            None => None,
        };

        if let Some(reply_to) = input.reply_to {
            let parent = self
                .messages
                .get(reply_to)
                .await?
                .ok_or(AppError::NotFound("message"))?;
            if parent.conversation_id != conversation.id {
                return Err(AppError::Validation(
                    "reply target is in another conversation".into(),
                ));
            }
        }

        // mentions resolve against the plaintext before encryption
        let mentions: Vec<Uuid> = parse_mentions(&input.content)
            .into_iter()
            .filter(|id| *id != sender_id && conversation.is_participant(*id))
            .collect();

        let body = self.codec.encode(&input.content);
        let message = self
            .messages
            .append(NewMessage {
                conversation_id: conversation.id,
                sender_id,
                body,
                message_type: input.message_type,
                attachment,
                reply_to: input.reply_to,
                mentions: mentions.clone(),
            })
            .await?;

        self.conversations
            .update_preview(
                conversation.id,
                MessagePreview {
                    content: truncate(&input.content, LAST_MESSAGE_PREVIEW_MAX),
                    sender_id,
                    timestamp: message.created_at,
                    message_type: message.message_type,
                },
            )
            .await?;
        let counters = self
            .conversations
            .increment_unread(conversation.id, sender_id)
            .await?;

        let view = self.view_of(&message, &input.content).await?;
        self.events
            .send_to_users(
                &conversation.participant_ids(),
                &ChatEvent::NewMessage {
                    conversation_id: conversation.id,
                    message: view.clone(),
                },
            )
            .await;
        self.broadcast_unread(conversation.id, &counters).await;
        for mentioned in &mentions {
            self.events
                .send_to_user(
                    *mentioned,
                    &ChatEvent::UserMentioned {
                        conversation_id: conversation.id,
                        message_id: message.id,
                        sender_id,
                        preview: truncate(&input.content, REPLY_PREVIEW_MAX),
                    },
                )
                .await;
        }

        Ok(view)
    }

    pub async fn edit_message(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        new_content: &str,
    ) -> AppResult<MessageView> {
        if new_content.trim().is_empty() {
            return Err(AppError::Validation("message content is required".into()));
        }
        let existing = self
            .messages
            .get(message_id)
            .await?
            .ok_or(AppError::NotFound("message"))?;
        if existing.sender_id != user_id {
            return Err(AppError::Forbidden("only the sender may edit a message".into()));
        }
        if existing.is_deleted {
            return Err(AppError::Conflict("message was deleted".into()));
        }
        if existing.message_type == MessageType::System {
            return Err(AppError::Conflict("system messages cannot be edited".into()));
        }
        let conversation = self
            .require_membership(existing.conversation_id, user_id)
            .await?;

        let body = self.codec.encode(new_content);
        let updated = self.messages.edit(message_id, body).await?;

        // refresh the preview when the newest message was edited
        if conversation
            .last_message
            .as_ref()
            .map_or(false, |p| p.timestamp <= updated.created_at)
        {
            self.conversations
                .update_preview(
                    conversation.id,
                    MessagePreview {
                        content: truncate(new_content, LAST_MESSAGE_PREVIEW_MAX),
                        sender_id: updated.sender_id,
                        timestamp: updated.created_at,
                        message_type: updated.message_type,
                    },
                )
                .await?;
        }

        let view = self.view_of(&updated, new_content).await?;
        self.events
            .send_to_users(
                &conversation.participant_ids(),
                &ChatEvent::MessageEdited {
                    conversation_id: conversation.id,
                    message: view.clone(),
                },
            )
            .await;
        Ok(view)
    }

    /// Tombstones a message. Allowed for the sender and for admins.
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> AppResult<()> {
        let existing = self
            .messages
            .get(message_id)
            .await?
            .ok_or(AppError::NotFound("message"))?;
        if existing.is_deleted {
            return Err(AppError::Conflict("message was already deleted".into()));
        }
        let conversation = self
            .require_membership(existing.conversation_id, user_id)
            .await?;

        if existing.sender_id != user_id {
            let actor = self.require_user(user_id).await?;
            if actor.role != Role::Admin {
                return Err(AppError::Forbidden(
                    "only the sender or an admin may delete a message".into(),
                ));
            }
        }

        self.messages.soft_delete(message_id, user_id).await?;
        self.events
            .send_to_users(
                &conversation.participant_ids(),
                &ChatEvent::MessageDeleted {
                    conversation_id: conversation.id,
                    message_id,
                    deleted_by: user_id,
                },
            )
            .await;
        Ok(())
    }

    pub async fn toggle_reaction(
        &self,
        user_id: Uuid,
        message_id: Uuid,
        emoji: &str,
    ) -> AppResult<MessageView> {
        if emoji.trim().is_empty() {
            return Err(AppError::Validation("emoji is required".into()));
        }
        let existing = self
            .messages
            .get(message_id)
            .await?
            .ok_or(AppError::NotFound("message"))?;
        if existing.is_deleted {
            return Err(AppError::Conflict("message was deleted".into()));
        }
        let conversation = self
            .require_membership(existing.conversation_id, user_id)
            .await?;

        let (updated, added) = self
            .messages
            .toggle_reaction(message_id, user_id, emoji)
            .await?;

        self.events
            .send_to_users(
                &conversation.participant_ids(),
                &ChatEvent::ReactionUpdated {
                    conversation_id: conversation.id,
                    message_id,
                    user_id,
                    emoji: emoji.to_string(),
                    added,
                    reactions: updated.reactions.clone(),
                },
            )
            .await;

        let content = self.codec.decode(&updated.body);
        self.view_of(&updated, &content).await
    }

    /// Marks everything in the conversation read for `user_id` and zeroes
    /// their unread counter. The only operation that decreases unread.
    pub async fn mark_conversation_read(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
    ) -> AppResult<()> {
        let conversation = self.require_membership(conversation_id, user_id).await?;

        let now = Utc::now();
        let message_ids = self
            .messages
            .mark_read(conversation_id, user_id, now)
            .await?;
        self.conversations
            .mark_seen(conversation_id, user_id, now)
            .await?;

        if !message_ids.is_empty() {
            self.events
                .send_to_users(
                    &conversation.other_participant_ids(user_id),
                    &ChatEvent::MessagesRead {
                        conversation_id,
                        reader_id: user_id,
                        message_ids,
                    },
                )
                .await;
        }
        let total = self.conversations.total_unread(user_id).await?;
        self.events
            .send_to_user(
                user_id,
                &ChatEvent::UnreadCountUpdated {
                    conversation_id,
                    unread_count: 0,
                    total_unread: total,
                },
            )
            .await;
        Ok(())
    }

    /// Fetches a page and records read receipts for it on behalf of the
    /// viewer. Receipts only: the unread counter is zeroed solely by
    /// `mark_conversation_read`.
    pub async fn page_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        query: PageQuery,
    ) -> AppResult<Vec<MessageView>> {
        let conversation = self.require_membership(conversation_id, user_id).await?;
        let messages = self.messages.page(conversation_id, query).await?;

        let fetched_ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();
        let read_ids = self
            .messages
            .mark_read_many(&fetched_ids, user_id, Utc::now())
            .await?;
        if !read_ids.is_empty() {
            self.events
                .send_to_users(
                    &conversation.other_participant_ids(user_id),
                    &ChatEvent::MessagesRead {
                        conversation_id,
                        reader_id: user_id,
                        message_ids: read_ids,
                    },
                )
                .await;
        }

        self.views_of(messages).await
    }

    pub async fn search_messages(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<MessageView>> {
        self.require_membership(conversation_id, user_id).await?;
        let query = query.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }
        let messages = self.messages.search(&[conversation_id], query, limit).await?;
        self.views_of(messages).await
    }

    /// Searches across every active conversation the user participates in.
    pub async fn search_all_messages(
        &self,
        user_id: Uuid,
        query: &str,
        limit: i64,
    ) -> AppResult<Vec<MessageView>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(vec![]);
        }
        let conversations = self.conversations.list_for_user(user_id, None).await?;
        let ids: Vec<Uuid> = conversations.iter().map(|c| c.id).collect();
        let messages = self.messages.search(&ids, query, limit).await?;
        self.views_of(messages).await
    }

    // ------------------------------------------------------------------
    // group management
    // ------------------------------------------------------------------

    pub async fn rename_group(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        title: &str,
    ) -> AppResult<ConversationView> {
        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("group title is required".into()));
        }
        let conversation = self.require_group_admin(conversation_id, user_id).await?;
        let old_title = conversation.title.clone().unwrap_or_default();

        let updated = self.conversations.rename(conversation_id, title).await?;
        let actor = self.require_user(user_id).await?;
        self.post_system_message(
            &updated,
            user_id,
            &format!(
                "{} renamed the group from \"{}\" to \"{}\"",
                actor.full_name, old_title, title
            ),
        )
        .await?;
        self.broadcast_group_update(&updated, GroupChange::Renamed, None)
            .await?;
        self.view_for(&updated, user_id).await
    }

    pub async fn add_group_participants(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        member_ids: &[Uuid],
    ) -> AppResult<ConversationView> {
        let conversation = self.require_group_admin(conversation_id, user_id).await?;

        let mut seeds = Vec::new();
        let mut names = Vec::new();
        for id in member_ids {
            if conversation.is_participant(*id) {
                continue;
            }
            let profile = self.require_user(*id).await?;
            names.push(profile.full_name.clone());
            seeds.push(ParticipantSeed {
                user_id: profile.id,
                role: profile.role,
            });
        }
        if seeds.is_empty() {
            return Err(AppError::Validation("no new members to add".into()));
        }

        let updated = self
            .conversations
            .add_participants(conversation_id, seeds)
            .await?;
        let actor = self.require_user(user_id).await?;
        self.post_system_message(
            &updated,
            user_id,
            &format!("{} added {}", actor.full_name, names.join(", ")),
        )
        .await?;
        self.broadcast_group_update(&updated, GroupChange::MembersAdded, None)
            .await?;
        self.view_for(&updated, user_id).await
    }

    pub async fn remove_group_participant(
        &self,
        user_id: Uuid,
        conversation_id: Uuid,
        member_id: Uuid,
    ) -> AppResult<ConversationView> {
        let conversation = self.require_group_admin(conversation_id, user_id).await?;
        if !conversation.is_participant(member_id) {
            return Err(AppError::NotFound("participant"));
        }
        if member_id == conversation.created_by {
            return Err(AppError::Forbidden("the group creator cannot be removed".into()));
        }
        // the group must stay usable after removal
        if conversation.participants.len() <= 2 {
            return Err(AppError::Conflict(
                "a group must keep at least two participants".into(),
            ));
        }

        let removed = self.require_user(member_id).await?;
        let updated = self
            .conversations
            .remove_participant(conversation_id, member_id)
            .await?;
        let actor = self.require_user(user_id).await?;
        self.post_system_message(
            &updated,
            user_id,
            &format!("{} removed {}", actor.full_name, removed.full_name),
        )
        .await?;
        self.broadcast_group_update(&updated, GroupChange::MemberRemoved, Some(member_id))
            .await?;
        self.view_for(&updated, user_id).await
    }

    // ------------------------------------------------------------------
    // typing indicators
    // ------------------------------------------------------------------

    pub async fn typing_start(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        let conversation = self.require_membership(conversation_id, user_id).await?;
        let peers = conversation.other_participant_ids(user_id);

        let events = self.events.clone();
        let stop_peers = peers.clone();
        let fresh = self.typing.start(conversation_id, user_id, move || {
            tokio::spawn(async move {
                events
                    .send_to_users(
                        &stop_peers,
                        &ChatEvent::UserStopTyping {
                            conversation_id,
                            user_id,
                        },
                    )
                    .await;
            });
        });

        if fresh {
            self.events
                .send_to_users(
                    &peers,
                    &ChatEvent::UserTyping {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }
        Ok(())
    }

    pub async fn typing_stop(&self, user_id: Uuid, conversation_id: Uuid) -> AppResult<()> {
        let conversation = self.require_membership(conversation_id, user_id).await?;
        if self.typing.stop(conversation_id, user_id) {
            self.events
                .send_to_users(
                    &conversation.other_participant_ids(user_id),
                    &ChatEvent::UserStopTyping {
                        conversation_id,
                        user_id,
                    },
                )
                .await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // helpers
    // ------------------------------------------------------------------

    async fn require_group_admin(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
    ) -> AppResult<Conversation> {
        let conversation = self.require_membership(conversation_id, user_id).await?;
        if conversation.kind != ConversationType::Group {
            return Err(AppError::Validation(
                "not a group conversation".into(),
            ));
        }
        if conversation.created_by != user_id {
            let actor = self.require_user(user_id).await?;
            if actor.role != Role::Admin {
                return Err(AppError::Forbidden(
                    "only the group creator or an admin may manage the group".into(),
                ));
            }
        }
        Ok(conversation)
    }

    /// Appends a system message and fans it out like a normal message,
    /// without bumping unread counters.
    async fn post_system_message(
        &self,
        conversation: &Conversation,
        actor_id: Uuid,
        text: &str,
    ) -> AppResult<()> {
        let body = self.codec.encode(text);
        let message = self
            .messages
            .append(NewMessage {
                conversation_id: conversation.id,
                sender_id: actor_id,
                body,
                message_type: MessageType::System,
                attachment: None,
                reply_to: None,
                mentions: vec![],
            })
            .await?;
        self.conversations
            .update_preview(
                conversation.id,
                MessagePreview {
                    content: truncate(text, LAST_MESSAGE_PREVIEW_MAX),
                    sender_id: actor_id,
                    timestamp: message.created_at,
                    message_type: MessageType::System,
                },
            )
            .await?;

        let view = self.view_of(&message, text).await?;
        self.events
            .send_to_users(
                &conversation.participant_ids(),
                &ChatEvent::NewMessage {
                    conversation_id: conversation.id,
                    message: view,
                },
            )
            .await;
        Ok(())
    }

    async fn broadcast_group_update(
        &self,
        conversation: &Conversation,
        change: GroupChange,
        removed: Option<Uuid>,
    ) -> AppResult<()> {
        let mut recipients = conversation.participant_ids();
        if let Some(removed) = removed {
            recipients.push(removed);
        }
        self.events
            .send_to_users(
                &recipients,
                &ChatEvent::GroupUpdated {
                    conversation_id: conversation.id,
                    change,
                    conversation: conversation.clone(),
                },
            )
            .await;
        Ok(())
    }

    async fn broadcast_unread(&self, conversation_id: Uuid, counters: &[(Uuid, i32)]) {
        for (user_id, unread_count) in counters {
            let total = match self.conversations.total_unread(*user_id).await {
                Ok(total) => total,
                Err(err) => {
                    tracing::warn!(%err, %user_id, "total unread lookup failed");
                    continue;
                }
            };
            self.events
                .send_to_user(
                    *user_id,
                    &ChatEvent::UnreadCountUpdated {
                        conversation_id,
                        unread_count: *unread_count,
                        total_unread: total,
                    },
                )
                .await;
        }
    }

    async fn view_for(
        &self,
        conversation: &Conversation,
        viewer_id: Uuid,
    ) -> AppResult<ConversationView> {
        let title = match conversation.kind {
            ConversationType::Group => conversation.title.clone(),
            ConversationType::Direct => {
                // direct title is the other participant's name
                match conversation
                    .other_participant_ids(viewer_id)
                    .first()
                    .copied()
                {
                    Some(peer) => self.directory.get_user(peer).await?.map(|p| p.full_name),
                    None => None,
                }
            }
        };

        Ok(ConversationView {
            id: conversation.id,
            kind: conversation.kind,
            title,
            participants: conversation.participant_ids(),
            last_message: conversation.last_message.clone(),
            context: conversation.context.clone(),
            unread_count: conversation
                .participant(viewer_id)
                .map_or(0, |p| p.unread_count),
            is_active: conversation.is_active,
            created_by: conversation.created_by,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        })
    }

    /// Builds the wire view for a message whose plaintext is already known
    /// (send and edit paths keep it around, saving a decode). Deleted
    /// messages never expose their body.
    async fn view_of(&self, message: &Message, content: &str) -> AppResult<MessageView> {
        let reply_to = match message.reply_to {
            Some(parent_id) => self.reply_preview(parent_id).await?,
            None => None,
        };
        Ok(MessageView {
            id: message.id,
            conversation_id: message.conversation_id,
            sender_id: message.sender_id,
            content: if message.is_deleted {
                String::new()
            } else {
                content.to_string()
            },
            message_type: message.message_type,
            encrypted: message.body.is_encrypted(),
            attachment: message.attachment.clone(),
            reply_to,
            mentions: message.mentions.clone(),
            reactions: message.reactions.clone(),
            read_by: message.read_by.clone(),
            is_edited: message.is_edited,
            edited_at: message.edited_at,
            is_deleted: message.is_deleted,
            created_at: message.created_at,
        })
    }

    async fn views_of(&self, messages: Vec<Message>) -> AppResult<Vec<MessageView>> {
        let mut out = Vec::with_capacity(messages.len());
        for message in messages {
            let content = if message.is_deleted {
                String::new()
            } else {
                self.codec.decode(&message.body)
            };
            out.push(self.view_of(&message, &content).await?);
        }
        Ok(out)
    }

    async fn reply_preview(&self, parent_id: Uuid) -> AppResult<Option<ReplyPreview>> {
        let Some(parent) = self.messages.get(parent_id).await? else {
            return Ok(None);
        };
        if parent.is_deleted {
            return Ok(None);
        }
        let content = self.codec.decode(&parent.body);
        Ok(Some(ReplyPreview {
            message_id: parent.id,
            sender_id: parent.sender_id,
            content: truncate(&content, REPLY_PREVIEW_MAX),
        }))
    }
}

/// Char-boundary safe truncation for previews.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}…")
}

#[cfg(test)]
mod tests {
    use super::truncate;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("héllo wörld", 5), "héllo…");
        let long = "a".repeat(300);
        assert_eq!(truncate(&long, 200).chars().count(), 201);
    }
}
