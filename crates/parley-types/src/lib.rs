//! Parley shared vocabulary.
//!
//! Domain records (users, chats, messages), the outbound command set and the
//! normalized inbound event set exchanged over the push connection, plus the
//! REST request bodies the client posts.

pub mod api;
pub mod events;
pub mod models;
pub mod wire;

pub use events::{ClientCommand, DecodeError, ServerEvent};
pub use models::{Chat, ChatId, Message, MessageId, SeenReceipt, User, UserId};
