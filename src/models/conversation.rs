use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::MessageType;
use crate::services::identity::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Direct,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Order,
    Lead,
    General,
    Support,
}

impl Default for ContextKind {
    fn default() -> Self {
        ContextKind::General
    }
}

impl ContextKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Order => "order",
            ContextKind::Lead => "lead",
            ContextKind::General => "general",
            ContextKind::Support => "support",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "order" => ContextKind::Order,
            "lead" => ContextKind::Lead,
            "support" => ContextKind::Support,
            _ => ContextKind::General,
        }
    }
}

/// Optional link to an external business entity, used only for filtering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub kind: ContextKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: Uuid,
    pub role: Role,
    pub joined_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub unread_count: i32,
}

impl Participant {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            role,
            joined_at: now,
            last_seen_at: now,
            unread_count: 0,
        }
    }
}

/// Denormalized snapshot of the most recently *created* message. Edits of
/// the newest message update it; deletion does not retract it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePreview {
    pub content: String,
    pub sender_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub kind: ConversationType,
    /// Required for groups, absent for direct conversations (the UI derives
    /// a direct title from the other participant).
    pub title: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message: Option<MessagePreview>,
    pub context: ConversationContext,
    pub is_active: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn participant(&self, user_id: Uuid) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn participant_ids(&self) -> Vec<Uuid> {
        self.participants.iter().map(|p| p.user_id).collect()
    }

    /// Everyone except `user_id`, for per-participant fan-out.
    pub fn other_participant_ids(&self, user_id: Uuid) -> Vec<Uuid> {
        self.participants
            .iter()
            .filter(|p| p.user_id != user_id)
            .map(|p| p.user_id)
            .collect()
    }
}

/// Canonical key for the at-most-one-direct-conversation invariant: the
/// unordered user pair, sorted so (A,B) and (B,A) collide.
pub fn direct_pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(direct_pair_key(a, b), direct_pair_key(b, a));
    }

    #[test]
    fn other_participants_excludes_self() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let conv = Conversation {
            id: Uuid::new_v4(),
            kind: ConversationType::Direct,
            title: None,
            participants: vec![
                Participant::new(a, Role::Agent),
                Participant::new(b, Role::AffiliateManager),
            ],
            last_message: None,
            context: ConversationContext::default(),
            is_active: true,
            created_by: a,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(conv.other_participant_ids(a), vec![b]);
        assert!(conv.is_participant(b));
    }
}
