use serde::Serialize;

use crate::models::{ChatId, UserId};

// -- Chats --

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessChatRequest {
    pub user_id: UserId,
}

// -- Messages --

/// Body of the send call. At least one of `content` / `attachment` is set.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: ChatId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<String>,
}

impl SendMessageRequest {
    pub fn text(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: Some(content.into()),
            attachment: None,
        }
    }

    pub fn attachment(chat_id: ChatId, reference: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: None,
            attachment: Some(reference.into()),
        }
    }
}

// -- Presence --

/// One row of a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub id: UserId,
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_omits_absent_body_parts() {
        let req = SendMessageRequest::text("c1".into(), "hi");
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json, serde_json::json!({"chatId": "c1", "content": "hi"}));

        let req = SendMessageRequest::attachment("c1".into(), "https://cdn/a.png");
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("content").is_none());
    }
}
