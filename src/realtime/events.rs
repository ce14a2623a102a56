//! Realtime event vocabulary. Every event serializes to a flat JSON
//! object with a `type` discriminator and a server timestamp so clients
//! switch on one field.

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::models::conversation::Conversation;
use crate::models::message::Reaction;
use crate::services::chat::MessageView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupChange {
    Created,
    Renamed,
    MembersAdded,
    MemberRemoved,
}

#[derive(Debug, Clone, Serialize)]
pub enum ChatEvent {
    #[serde(rename = "new_message")]
    NewMessage {
        conversation_id: Uuid,
        message: MessageView,
    },
    #[serde(rename = "message_edited")]
    MessageEdited {
        conversation_id: Uuid,
        message: MessageView,
    },
    #[serde(rename = "message_deleted")]
    MessageDeleted {
        conversation_id: Uuid,
        message_id: Uuid,
        deleted_by: Uuid,
    },
    #[serde(rename = "reaction_updated")]
    ReactionUpdated {
        conversation_id: Uuid,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        added: bool,
        reactions: Vec<Reaction>,
    },
    #[serde(rename = "messages_read")]
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
    },
    #[serde(rename = "unread_count_updated")]
    UnreadCountUpdated {
        conversation_id: Uuid,
        unread_count: i32,
        total_unread: i64,
    },
    #[serde(rename = "group_updated")]
    GroupUpdated {
        conversation_id: Uuid,
        change: GroupChange,
        conversation: Conversation,
    },
    #[serde(rename = "user_mentioned")]
    UserMentioned {
        conversation_id: Uuid,
        message_id: Uuid,
        sender_id: Uuid,
        preview: String,
    },
    #[serde(rename = "user_typing")]
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
    #[serde(rename = "user_stop_typing")]
    UserStopTyping {
        conversation_id: Uuid,
        user_id: Uuid,
    },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::NewMessage { .. } => "new_message",
            ChatEvent::MessageEdited { .. } => "message_edited",
            ChatEvent::MessageDeleted { .. } => "message_deleted",
            ChatEvent::ReactionUpdated { .. } => "reaction_updated",
            ChatEvent::MessagesRead { .. } => "messages_read",
            ChatEvent::UnreadCountUpdated { .. } => "unread_count_updated",
            ChatEvent::GroupUpdated { .. } => "group_updated",
            ChatEvent::UserMentioned { .. } => "user_mentioned",
            ChatEvent::UserTyping { .. } => "user_typing",
            ChatEvent::UserStopTyping { .. } => "user_stop_typing",
        }
    }

    /// Flattens the externally tagged enum into one object with a `type`
    /// field and a timestamp, the shape clients consume.
    pub fn to_payload_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        let mut payload = serde_json::json!({
            "type": self.event_type(),
            "timestamp": Utc::now().to_rfc3339(),
        });

        let tagged = serde_json::to_value(self)?;
        if let serde_json::Value::Object(outer) = tagged {
            for (_, fields) in outer {
                if let serde_json::Value::Object(map) = fields {
                    for (key, value) in map {
                        payload[key] = value;
                    }
                }
            }
        }
        Ok(payload)
    }

    pub fn to_payload_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_payload_value()?)
    }
}
