use std::future::Future;

use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use tracing::debug;

use parley_types::api::{AccessChatRequest, SendMessageRequest};
use parley_types::wire::{ChatRecord, MessageRecord, UserRecord};
use parley_types::{Chat, ChatId, Message, User, UserId};

use crate::error::ApiError;

/// A directory row: the user plus the online flag the server attached, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub user: User,
    pub online: Option<bool>,
}

/// The REST collaborator. Calls are spawned off the session loop, so the
/// returned futures must be `Send`.
pub trait ChatApi: Send + Sync + 'static {
    fn fetch_users(&self) -> impl Future<Output = Result<Vec<DirectoryEntry>, ApiError>> + Send;

    /// Create or fetch the one-to-one chat with `user`.
    fn access_chat(&self, user: &UserId) -> impl Future<Output = Result<Chat, ApiError>> + Send;

    fn fetch_history(
        &self,
        chat_id: &ChatId,
    ) -> impl Future<Output = Result<Vec<Message>, ApiError>> + Send;

    fn post_message(
        &self,
        req: SendMessageRequest,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// Upload a profile picture; returns the refreshed user.
    fn upload_avatar(
        &self,
        file_name: String,
        data: Bytes,
    ) -> impl Future<Output = Result<User, ApiError>> + Send;
}

/// `reqwest`-backed client with bearer auth.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(resp).await
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json::<T>().await?)
}

impl ChatApi for HttpApi {
    async fn fetch_users(&self) -> Result<Vec<DirectoryEntry>, ApiError> {
        let records: Vec<UserRecord> = self.get_json("/api/users").await?;
        debug!(count = records.len(), "fetched user directory");
        Ok(records
            .into_iter()
            .map(|record| {
                let (user, online) = record.into_parts();
                DirectoryEntry { user, online }
            })
            .collect())
    }

    async fn access_chat(&self, user: &UserId) -> Result<Chat, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/chat"))
            .bearer_auth(&self.token)
            .json(&AccessChatRequest {
                user_id: user.clone(),
            })
            .send()
            .await?;
        let record: ChatRecord = read_json(resp).await?;
        Ok(Chat::try_from(record)?)
    }

    async fn fetch_history(&self, chat_id: &ChatId) -> Result<Vec<Message>, ApiError> {
        let records: Vec<MessageRecord> =
            self.get_json(&format!("/api/message/{chat_id}")).await?;
        let messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        debug!(chat_id = %chat_id, count = messages.len(), "fetched history");
        Ok(messages)
    }

    async fn post_message(&self, req: SendMessageRequest) -> Result<Message, ApiError> {
        let resp = self
            .client
            .post(self.url("/api/message"))
            .bearer_auth(&self.token)
            .json(&req)
            .send()
            .await?;
        let record: MessageRecord = read_json(resp).await?;
        Ok(Message::try_from(record)?)
    }

    async fn upload_avatar(&self, file_name: String, data: Bytes) -> Result<User, ApiError> {
        let form = Form::new().part("pic", Part::stream(data).file_name(file_name));
        let resp = self
            .client
            .put(self.url("/api/user/avatar"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let record: UserRecord = read_json(resp).await?;
        Ok(record.into_parts().0)
    }
}
