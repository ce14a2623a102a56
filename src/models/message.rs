use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    File,
    Image,
    System,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::File => "file",
            MessageType::Image => "image",
            MessageType::System => "system",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "file" => MessageType::File,
            "image" => MessageType::Image,
            "system" => MessageType::System,
            _ => MessageType::Text,
        }
    }
}

/// AES-256-GCM envelope. All fields are base64.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedBody {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    pub algorithm: String,
}

/// A stored message body is either plaintext (encryption unavailable at
/// write time) or an encrypted envelope. Readers must handle both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageBody {
    Plain { content: String },
    Encrypted(EncryptedBody),
}

impl MessageBody {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, MessageBody::Encrypted(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mimetype: String,
    pub size: i64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub user_id: Uuid,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub user_id: Uuid,
    pub reacted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub body: MessageBody,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    pub mentions: Vec<Uuid>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    /// Body as it was before the first edit; later edits keep the original.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_body: Option<MessageBody>,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn has_reaction(&self, user_id: Uuid, emoji: &str) -> bool {
        self.reactions
            .iter()
            .any(|r| r.user_id == user_id && r.emoji == emoji)
    }

    pub fn is_read_by(&self, user_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.user_id == user_id)
    }
}

static MENTION_RE: Lazy<Regex> = Lazy::new(|| {
    // @[Display Name](uuid)
    Regex::new(
        r"@\[([^\]]+)\]\(([0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12})\)",
    )
    .unwrap()
});

/// Extracts mentioned user ids from message markup. Duplicates are
/// collapsed, order of first occurrence is preserved.
pub fn parse_mentions(content: &str) -> Vec<Uuid> {
    let mut seen = Vec::new();
    for cap in MENTION_RE.captures_iter(content) {
        if let Ok(id) = cap[2].parse::<Uuid>() {
            if !seen.contains(&id) {
                seen.push(id);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mentions_from_markup() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let text = format!(
            "ping @[Alice Smith]({alice}) and @[Bob]({bob}), also @[Alice Smith]({alice}) again"
        );
        assert_eq!(parse_mentions(&text), vec![alice, bob]);
    }

    #[test]
    fn ignores_malformed_mentions() {
        assert!(parse_mentions("@[Nobody](not-a-uuid) plain @text").is_empty());
        assert!(parse_mentions("no mentions here").is_empty());
    }

    #[test]
    fn reaction_lookup_matches_user_and_emoji() {
        let user = Uuid::new_v4();
        let msg = Message {
            id: Uuid::new_v4(),
            conversation_id: Uuid::new_v4(),
            sender_id: user,
            body: MessageBody::Plain {
                content: "hi".into(),
            },
            message_type: MessageType::Text,
            attachment: None,
            reply_to: None,
            mentions: vec![],
            reactions: vec![Reaction {
                emoji: "👍".into(),
                user_id: user,
                reacted_at: Utc::now(),
            }],
            read_by: vec![],
            is_edited: false,
            edited_at: None,
            original_body: None,
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            created_at: Utc::now(),
        };
        assert!(msg.has_reaction(user, "👍"));
        assert!(!msg.has_reaction(user, "❤️"));
        assert!(!msg.has_reaction(Uuid::new_v4(), "👍"));
    }
}
