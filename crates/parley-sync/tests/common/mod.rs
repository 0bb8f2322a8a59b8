//! In-memory collaborators for driving a session without a network.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::Instant;

use parley_sync::api::{ChatApi, DirectoryEntry};
use parley_sync::{
    ApiError, Connector, Link, SessionController, SessionHandle, SessionUpdate, SyncConfig,
    TransportEvent,
};
use parley_types::api::SendMessageRequest;
use parley_types::{Chat, ChatId, ClientCommand, Message, ServerEvent, User, UserId};

pub const LOCAL: &str = "me";

// -- Transport --

/// The far end of one in-memory link.
pub struct ServerSide {
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl ServerSide {
    pub fn accept(&self) {
        let _ = self.events.send(TransportEvent::Connected);
    }

    pub fn refuse(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::ConnectFailed(reason.into()));
    }

    pub fn drop_connection(&self, reason: &str) {
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: reason.into(),
        });
    }

    pub fn push(&self, event: ServerEvent) {
        let _ = self.events.send(TransportEvent::Event(event));
    }

    /// Stop accepting commands while the link still looks connected.
    pub fn stop_reading(&mut self) {
        self.commands.close();
    }

    /// Everything the client has sent since the last call.
    pub fn sent(&mut self) -> Vec<ClientCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            out.push(cmd);
        }
        out
    }
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    pending: Arc<Mutex<VecDeque<ServerSide>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The server side of the oldest link not yet taken.
    pub fn take(&self) -> ServerSide {
        self.pending
            .lock()
            .unwrap()
            .pop_front()
            .expect("no link was opened")
    }
}

impl Connector for MemoryConnector {
    fn connect(&self) -> Link {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push_back(ServerSide {
            commands: out_rx,
            events: in_tx,
        });
        Link::new(out_tx, in_rx)
    }
}

// -- REST --

#[derive(Default)]
struct ApiState {
    directory: Vec<DirectoryEntry>,
    chats: HashMap<UserId, Chat>,
    histories: HashMap<ChatId, Vec<Message>>,
    /// Artificial latency per chat-access target or history chat id
    delays: HashMap<String, Duration>,
    fail_posts: bool,
    posted: Vec<SendMessageRequest>,
    next_id: usize,
}

#[derive(Clone, Default)]
pub struct FakeApi {
    state: Arc<Mutex<ApiState>>,
}

impl FakeApi {
    pub fn with_directory(&self, entries: Vec<DirectoryEntry>) {
        self.state.lock().unwrap().directory = entries;
    }

    pub fn with_chat(&self, peer: &str, chat_id: &str) -> Chat {
        let chat = Chat {
            id: chat_id.into(),
            users: [LOCAL.into(), peer.into()],
        };
        self.state
            .lock()
            .unwrap()
            .chats
            .insert(peer.into(), chat.clone());
        chat
    }

    pub fn with_history(&self, chat_id: &str, messages: Vec<Message>) {
        self.state
            .lock()
            .unwrap()
            .histories
            .insert(chat_id.into(), messages);
    }

    pub fn with_delay(&self, key: &str, delay: Duration) {
        self.state.lock().unwrap().delays.insert(key.into(), delay);
    }

    pub fn fail_posts(&self, fail: bool) {
        self.state.lock().unwrap().fail_posts = fail;
    }

    pub fn posted(&self) -> Vec<SendMessageRequest> {
        self.state.lock().unwrap().posted.clone()
    }

    fn delay(&self, key: &str) -> Option<Duration> {
        self.state.lock().unwrap().delays.get(key).copied()
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::Status {
        status: 404,
        body: format!("{what} not found"),
    }
}

impl ChatApi for FakeApi {
    async fn fetch_users(&self) -> Result<Vec<DirectoryEntry>, ApiError> {
        Ok(self.state.lock().unwrap().directory.clone())
    }

    async fn access_chat(&self, user: &UserId) -> Result<Chat, ApiError> {
        if let Some(delay) = self.delay(user.as_str()) {
            tokio::time::sleep(delay).await;
        }
        let chat = self.state.lock().unwrap().chats.get(user).cloned();
        chat.ok_or_else(|| not_found("user"))
    }

    async fn fetch_history(&self, chat_id: &ChatId) -> Result<Vec<Message>, ApiError> {
        if let Some(delay) = self.delay(chat_id.as_str()) {
            tokio::time::sleep(delay).await;
        }
        let history = self.state.lock().unwrap().histories.get(chat_id).cloned();
        Ok(history.unwrap_or_default())
    }

    async fn post_message(&self, req: SendMessageRequest) -> Result<Message, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.posted.push(req.clone());
        if state.fail_posts {
            return Err(ApiError::Status {
                status: 500,
                body: "database unavailable".into(),
            });
        }
        state.next_id += 1;
        Ok(Message {
            id: format!("srv-{}", state.next_id).into(),
            chat_id: req.chat_id,
            sender: LOCAL.into(),
            content: req.content,
            attachment: req.attachment,
            created_at: Utc::now(),
            seen_by: BTreeSet::new(),
        })
    }

    async fn upload_avatar(&self, file_name: String, data: Bytes) -> Result<User, ApiError> {
        Ok(User {
            id: LOCAL.into(),
            name: "Me".into(),
            avatar: Some(format!("https://cdn.example/{file_name}?size={}", data.len())),
        })
    }
}

// -- Fixtures --

pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}

pub fn message(id: &str, chat: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: id.into(),
        chat_id: chat.into(),
        sender: sender.into(),
        content: Some(format!("message {id}")),
        attachment: None,
        created_at: at(secs),
        seen_by: BTreeSet::new(),
    }
}

pub fn chat(id: &str, peer: &str) -> Chat {
    Chat {
        id: id.into(),
        users: [LOCAL.into(), peer.into()],
    }
}

// -- Harness --

pub struct Harness {
    pub session: SessionController<MemoryConnector, FakeApi>,
    pub handle: SessionHandle,
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
    pub connector: MemoryConnector,
    pub api: FakeApi,
}

impl Harness {
    pub fn new() -> Self {
        let connector = MemoryConnector::default();
        let api = FakeApi::default();
        let (session, handle, updates) = SessionController::new(
            SyncConfig::default(),
            LOCAL.into(),
            connector.clone(),
            api.clone(),
        );
        Self {
            session,
            handle,
            updates,
            connector,
            api,
        }
    }

    /// Connect and complete the handshake. Returns the server side with the
    /// handshake commands already drained.
    pub async fn connected(&mut self) -> ServerSide {
        self.session.connect();
        let mut server = self.connector.take();
        server.accept();
        self.settle().await;
        server.sent();
        self.drain_updates();
        server
    }

    /// Process inputs for `duration` of (virtual) time.
    pub async fn run_for(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while tokio::time::timeout_at(deadline, self.session.step())
            .await
            .is_ok()
        {}
    }

    /// Process everything that is ready right now.
    pub async fn settle(&mut self) {
        self.run_for(Duration::from_millis(1)).await;
    }

    pub fn drain_updates(&mut self) -> Vec<SessionUpdate> {
        let mut out = Vec::new();
        while let Ok(update) = self.updates.try_recv() {
            out.push(update);
        }
        out
    }
}
