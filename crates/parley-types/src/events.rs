use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{ChatId, Message, MessageId, SeenReceipt, UserId};
use crate::wire::{IdRef, MessageRecord};

/// Commands sent FROM client TO server over the push connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientCommand {
    /// Register the local user with the connection (handshake)
    #[serde(rename = "setup")]
    Setup(UserId),

    /// Subscribe to a chat's room
    #[serde(rename = "join chat")]
    JoinChat(ChatId),

    /// Relay a message that the REST call already persisted
    #[serde(rename = "new message")]
    NewMessage(Message),

    /// Acknowledge that the local user has seen a message
    #[serde(rename = "message seen")]
    MessageSeen(SeenReceipt),

    #[serde(rename = "typing")]
    Typing(ChatId),

    #[serde(rename = "stop typing")]
    StopTyping(ChatId),
}

impl ClientCommand {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::JoinChat(_) => "join chat",
            Self::NewMessage(_) => "new message",
            Self::MessageSeen(_) => "message seen",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop typing",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Events received FROM the server, already normalized.
///
/// Chat-scoped typing events may arrive without chat context; the session
/// attributes those to whichever chat is active at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    MessageReceived(Message),
    MessageSeenUpdate(SeenReceipt),
    Typing { chat_id: Option<ChatId> },
    StopTyping { chat_id: Option<ChatId> },
    /// Full presence snapshot
    OnlineUsers(Vec<UserId>),
    UserOnline(UserId),
    UserOffline(UserId),
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event `{0}`")]
    UnknownEvent(String),

    #[error("missing id for {0}")]
    MissingId(&'static str),

    #[error("message {0} has neither content nor attachment")]
    EmptyMessage(MessageId),

    #[error("one-to-one chat has {0} participants")]
    Participants(usize),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeenRecord {
    message_id: IdRef,
    user_id: IdRef,
}

impl ServerEvent {
    /// Decode one text frame `{"event": ..., "data": ...}`.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let Envelope { event, data } = serde_json::from_str(text)?;

        let decoded = match event.as_str() {
            "message received" => {
                let record: MessageRecord = serde_json::from_value(data)?;
                Self::MessageReceived(record.try_into()?)
            }
            "message seen update" => {
                let record: SeenRecord = serde_json::from_value(data)?;
                Self::MessageSeenUpdate(SeenReceipt {
                    message_id: MessageId::new(
                        record.message_id.into_id().ok_or(DecodeError::MissingId("messageId"))?,
                    ),
                    user_id: UserId::new(
                        record.user_id.into_id().ok_or(DecodeError::MissingId("userId"))?,
                    ),
                })
            }
            "typing" => Self::Typing {
                chat_id: typing_scope(data)?,
            },
            "stop typing" => Self::StopTyping {
                chat_id: typing_scope(data)?,
            },
            "online users" => {
                let refs: Vec<IdRef> = serde_json::from_value(data)?;
                Self::OnlineUsers(
                    refs.into_iter()
                        .filter_map(IdRef::into_id)
                        .map(UserId::new)
                        .collect(),
                )
            }
            "user online" => Self::UserOnline(user_ref(data)?),
            "user offline" => Self::UserOffline(user_ref(data)?),
            _ => return Err(DecodeError::UnknownEvent(event)),
        };

        Ok(decoded)
    }

    /// Returns the chat this event is scoped to, if it carries one.
    pub fn chat_id(&self) -> Option<&ChatId> {
        match self {
            Self::MessageReceived(msg) => Some(&msg.chat_id),
            Self::Typing { chat_id } | Self::StopTyping { chat_id } => chat_id.as_ref(),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageReceived(_) => "message received",
            Self::MessageSeenUpdate(_) => "message seen update",
            Self::Typing { .. } => "typing",
            Self::StopTyping { .. } => "stop typing",
            Self::OnlineUsers(_) => "online users",
            Self::UserOnline(_) => "user online",
            Self::UserOffline(_) => "user offline",
        }
    }
}

fn user_ref(data: Value) -> Result<UserId, DecodeError> {
    let id: IdRef = serde_json::from_value(data)?;
    id.into_id()
        .map(UserId::new)
        .ok_or(DecodeError::MissingId("user"))
}

/// Typing payloads come as nothing, a chat id, a chat object or `{chatId, toUserId}`.
fn typing_scope(data: Value) -> Result<Option<ChatId>, DecodeError> {
    let scope = match data {
        Value::Null => None,
        Value::Object(mut map) => match map.remove("chatId") {
            Some(chat) => serde_json::from_value::<IdRef>(chat)?.into_id(),
            None => serde_json::from_value::<IdRef>(Value::Object(map))?.into_id(),
        },
        other => serde_json::from_value::<IdRef>(other)?.into_id(),
    };
    Ok(scope.map(ChatId::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_uses_event_envelope() {
        let cmd = ClientCommand::MessageSeen(SeenReceipt {
            message_id: "m1".into(),
            user_id: "u1".into(),
        });
        let json: Value = serde_json::from_str(&cmd.encode().unwrap()).unwrap();
        assert_eq!(json["event"], "message seen");
        assert_eq!(json["data"]["messageId"], "m1");
        assert_eq!(json["data"]["userId"], "u1");

        let setup: Value =
            serde_json::from_str(&ClientCommand::Setup("u1".into()).encode().unwrap()).unwrap();
        assert_eq!(setup, serde_json::json!({"event": "setup", "data": "u1"}));
    }

    #[test]
    fn presence_payload_shapes_normalize() {
        let snapshot =
            ServerEvent::decode(r#"{"event":"online users","data":["a",{"_id":"b"},{"id":"c"}]}"#)
                .unwrap();
        assert_eq!(
            snapshot,
            ServerEvent::OnlineUsers(vec!["a".into(), "b".into(), "c".into()])
        );

        let online = ServerEvent::decode(r#"{"event":"user online","data":{"_id":"a"}}"#).unwrap();
        assert_eq!(online, ServerEvent::UserOnline("a".into()));

        let offline = ServerEvent::decode(r#"{"event":"user offline","data":"a"}"#).unwrap();
        assert_eq!(offline, ServerEvent::UserOffline("a".into()));
    }

    #[test]
    fn typing_scope_shapes_normalize() {
        let bare = ServerEvent::decode(r#"{"event":"typing"}"#).unwrap();
        assert_eq!(bare, ServerEvent::Typing { chat_id: None });

        let scoped = ServerEvent::decode(r#"{"event":"typing","data":"c1"}"#).unwrap();
        assert_eq!(scoped.chat_id(), Some(&ChatId::from("c1")));

        let targeted =
            ServerEvent::decode(r#"{"event":"stop typing","data":{"chatId":"c1","toUserId":"u2"}}"#)
                .unwrap();
        assert_eq!(
            targeted,
            ServerEvent::StopTyping {
                chat_id: Some("c1".into())
            }
        );
    }

    #[test]
    fn seen_update_decodes() {
        let ev = ServerEvent::decode(
            r#"{"event":"message seen update","data":{"messageId":"m1","userId":{"_id":"u2"}}}"#,
        )
        .unwrap();
        assert_eq!(
            ev,
            ServerEvent::MessageSeenUpdate(SeenReceipt {
                message_id: "m1".into(),
                user_id: "u2".into(),
            })
        );
    }

    #[test]
    fn unknown_and_malformed_frames_fail() {
        assert!(matches!(
            ServerEvent::decode(r#"{"event":"reaction","data":{}}"#),
            Err(DecodeError::UnknownEvent(_))
        ));
        assert!(matches!(
            ServerEvent::decode("not json"),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(
            ServerEvent::decode(r#"{"event":"user online","data":{}}"#),
            Err(DecodeError::MissingId(_))
        ));
    }
}
