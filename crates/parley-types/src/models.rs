use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Server-assigned user identifier.
    UserId
);
string_id!(
    /// Server-assigned chat identifier.
    ChatId
);
string_id!(
    /// Server-assigned message identifier, unique across all chats.
    MessageId
);

/// A user as returned by the directory fetch. Online state is not part of the
/// record; it lives in the presence tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar: Option<String>,
}

/// A one-to-one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: ChatId,
    pub users: [UserId; 2],
}

impl Chat {
    /// The participant that is not `local`. A chat with yourself has no peer.
    pub fn peer_of(&self, local: &UserId) -> Option<&UserId> {
        self.users.iter().find(|u| *u != local)
    }

    pub fn has_participant(&self, user: &UserId) -> bool {
        self.users.contains(user)
    }
}

/// A chat message. `seen_by` only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: MessageId,
    #[serde(rename = "chat")]
    pub chat_id: ChatId,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub seen_by: BTreeSet<UserId>,
}

impl Message {
    /// Record that `user` has seen this message. Returns true if it was new.
    pub fn mark_seen(&mut self, user: UserId) -> bool {
        self.seen_by.insert(user)
    }

    /// Union another seen set into this one. Returns true if anything was added.
    pub fn merge_seen<I>(&mut self, users: I) -> bool
    where
        I: IntoIterator<Item = UserId>,
    {
        let before = self.seen_by.len();
        self.seen_by.extend(users);
        self.seen_by.len() != before
    }

    pub fn is_seen_by(&self, user: &UserId) -> bool {
        self.seen_by.contains(user)
    }

    /// True once anyone other than the sender has seen the message.
    /// Drives the read tick on the sender's own messages.
    pub fn is_seen_by_other(&self) -> bool {
        self.seen_by.iter().any(|u| *u != self.sender)
    }
}

/// "User X has seen message M", in both directions over the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenReceipt {
    pub message_id: MessageId,
    pub user_id: UserId,
}
