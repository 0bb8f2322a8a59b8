//! Loose record shapes as the server actually sends them.
//!
//! The server is inconsistent about references: a sender may arrive as a bare
//! id or as a populated user object keyed by `_id` or `id`. Everything here is
//! converted into the strict models before it reaches the sync core.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::events::DecodeError;
use crate::models::{Chat, ChatId, Message, MessageId, User, UserId};

/// A reference to an entity: either its id or an object carrying it.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    Bare(String),
    Object {
        #[serde(rename = "_id")]
        underscore_id: Option<String>,
        id: Option<String>,
    },
}

impl IdRef {
    pub fn into_id(self) -> Option<String> {
        let id = match self {
            Self::Bare(id) => Some(id),
            Self::Object { underscore_id, id } => underscore_id.or(id),
        };
        id.filter(|s| !s.is_empty())
    }

    fn require(self, field: &'static str) -> Result<String, DecodeError> {
        self.into_id().ok_or(DecodeError::MissingId(field))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: IdRef,
    #[serde(alias = "chatId")]
    pub chat: IdRef,
    pub sender: IdRef,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "pic", alias = "file")]
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seen_by: Vec<IdRef>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = DecodeError;

    fn try_from(record: MessageRecord) -> Result<Self, Self::Error> {
        let id = MessageId::new(record.id.require("message._id")?);
        let content = record.content.filter(|c| !c.is_empty());
        let attachment = record.attachment.filter(|a| !a.is_empty());
        if content.is_none() && attachment.is_none() {
            return Err(DecodeError::EmptyMessage(id));
        }

        let seen_by: BTreeSet<UserId> = record
            .seen_by
            .into_iter()
            .filter_map(IdRef::into_id)
            .map(UserId::new)
            .collect();

        Ok(Message {
            id,
            chat_id: ChatId::new(record.chat.require("message.chat")?),
            sender: UserId::new(record.sender.require("message.sender")?),
            content,
            attachment,
            created_at: record.created_at,
            seen_by,
        })
    }
}

/// Directory entry. Some server versions attach a persisted online flag.
#[derive(Debug, Clone, Deserialize)]
pub struct UserRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub name: String,
    #[serde(default, alias = "pic")]
    pub avatar: Option<String>,
    #[serde(default, alias = "isOnline")]
    pub online: Option<bool>,
}

impl UserRecord {
    /// Split into the user and the online flag it carried, if any.
    pub fn into_parts(self) -> (User, Option<bool>) {
        let user = User {
            id: UserId::new(self.id),
            name: self.name,
            avatar: self.avatar.filter(|a| !a.is_empty()),
        };
        (user, self.online)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    pub users: Vec<IdRef>,
}

impl TryFrom<ChatRecord> for Chat {
    type Error = DecodeError;

    fn try_from(record: ChatRecord) -> Result<Self, Self::Error> {
        let ids: Vec<UserId> = record
            .users
            .into_iter()
            .filter_map(IdRef::into_id)
            .map(UserId::new)
            .collect();

        let users: [UserId; 2] = ids
            .try_into()
            .map_err(|ids: Vec<UserId>| DecodeError::Participants(ids.len()))?;

        Ok(Chat {
            id: ChatId::new(record.id),
            users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_message_record_normalizes() {
        let json = r#"{
            "_id": "m1",
            "chat": {"_id": "c1", "users": []},
            "sender": {"_id": "u1", "name": "Ann"},
            "content": "hello",
            "createdAt": "2024-05-01T10:00:00Z",
            "seenBy": ["u2", {"id": "u3"}, {"name": "nobody"}]
        }"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        let msg = Message::try_from(record).unwrap();

        assert_eq!(msg.id.as_str(), "m1");
        assert_eq!(msg.chat_id.as_str(), "c1");
        assert_eq!(msg.sender.as_str(), "u1");
        assert_eq!(msg.seen_by.len(), 2);
        assert!(msg.is_seen_by(&"u3".into()));
    }

    #[test]
    fn bare_message_record_normalizes() {
        let json = r#"{"_id":"m2","chat":"c1","sender":"u1","pic":"https://cdn/x.png","createdAt":"2024-05-01T10:00:00Z"}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        let msg = Message::try_from(record).unwrap();

        assert_eq!(msg.content, None);
        assert_eq!(msg.attachment.as_deref(), Some("https://cdn/x.png"));
        assert!(msg.seen_by.is_empty());
    }

    #[test]
    fn message_without_body_is_rejected() {
        let json = r#"{"_id":"m3","chat":"c1","sender":"u1","content":"","createdAt":"2024-05-01T10:00:00Z"}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert!(matches!(
            Message::try_from(record),
            Err(DecodeError::EmptyMessage(_))
        ));
    }

    #[test]
    fn chat_needs_two_participants() {
        let ok: ChatRecord =
            serde_json::from_str(r#"{"_id":"c1","users":[{"_id":"a"},"b"]}"#).unwrap();
        let chat = Chat::try_from(ok).unwrap();
        assert_eq!(chat.users, [UserId::from("a"), UserId::from("b")]);

        let group: ChatRecord =
            serde_json::from_str(r#"{"_id":"c2","users":["a","b","c"]}"#).unwrap();
        assert!(matches!(
            Chat::try_from(group),
            Err(DecodeError::Participants(3))
        ));
    }

    #[test]
    fn user_record_keeps_online_flag_separate() {
        let record: UserRecord =
            serde_json::from_str(r#"{"_id":"u1","name":"Ann","pic":"","isOnline":true}"#).unwrap();
        let (user, online) = record.into_parts();
        assert_eq!(user.avatar, None);
        assert_eq!(online, Some(true));
    }
}
