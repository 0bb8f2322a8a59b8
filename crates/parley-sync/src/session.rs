use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_types::api::{PresenceEntry, SendMessageRequest};
use parley_types::{Chat, ChatId, ClientCommand, Message, ServerEvent, User, UserId};

use crate::api::{ChatApi, DirectoryEntry};
use crate::config::SyncConfig;
use crate::error::{ApiError, SyncError};
use crate::presence::PresenceTracker;
use crate::seen::SeenCoordinator;
use crate::store::{Appended, MessageStore, SeenApplied};
use crate::timers::{TimerKind, TimerRegistry};
use crate::transport::{Connector, Link, TransportEvent};
use crate::typing::TypingCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Requests from the UI collaborator.
#[derive(Debug, Clone)]
pub enum UserAction {
    Connect,
    Disconnect,
    RefreshUsers,
    /// Open (create or fetch) the chat with this user and make it active
    OpenChat(UserId),
    /// The compose box changed
    InputChanged,
    SendText(String),
    /// Send an already-uploaded attachment reference
    SendAttachment(String),
    UploadAvatar { file_name: String, data: Bytes },
}

/// Everything the UI collaborator can observe.
#[derive(Debug)]
pub enum SessionUpdate {
    State(ConnectionState),
    Error(SyncError),
    UsersLoaded(Vec<User>),
    /// Currently online users, after any presence change
    Presence(Vec<UserId>),
    ChatOpened { chat: Chat, peer: Option<UserId> },
    /// Full message list of the active chat
    Messages { chat_id: ChatId, messages: Vec<Message> },
    RemoteTyping { chat_id: ChatId, typing: bool },
    ProfileUpdated(User),
}

/// REST results, delivered back to the loop as events.
#[derive(Debug)]
enum Completion {
    Users(Result<Vec<DirectoryEntry>, ApiError>),
    ChatAccessed {
        target: UserId,
        result: Result<Chat, ApiError>,
    },
    History {
        chat_id: ChatId,
        result: Result<Vec<Message>, ApiError>,
    },
    Sent(Result<Message, ApiError>),
    Avatar(Result<User, ApiError>),
}

/// Cloneable front door to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    actions: mpsc::UnboundedSender<UserAction>,
}

impl SessionHandle {
    /// Queue an action. Returns false once the session has shut down.
    pub fn act(&self, action: UserAction) -> bool {
        self.actions.send(action).is_ok()
    }

    pub fn connect(&self) -> bool {
        self.act(UserAction::Connect)
    }

    pub fn disconnect(&self) -> bool {
        self.act(UserAction::Disconnect)
    }

    pub fn refresh_users(&self) -> bool {
        self.act(UserAction::RefreshUsers)
    }

    pub fn open_chat(&self, user: UserId) -> bool {
        self.act(UserAction::OpenChat(user))
    }

    pub fn input_changed(&self) -> bool {
        self.act(UserAction::InputChanged)
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.act(UserAction::SendText(text.into()))
    }

    pub fn send_attachment(&self, reference: impl Into<String>) -> bool {
        self.act(UserAction::SendAttachment(reference.into()))
    }

    pub fn upload_avatar(&self, file_name: impl Into<String>, data: Bytes) -> bool {
        self.act(UserAction::UploadAvatar {
            file_name: file_name.into(),
            data,
        })
    }
}

/// Owns the connection and every piece of sync state for one signed-in user.
///
/// All inputs (UI actions, transport events, REST completions, timers) are
/// drained by a single loop, one at a time. Handlers that care about the
/// active chat read it from `self.active` at dispatch time.
pub struct SessionController<C, A> {
    config: SyncConfig,
    local: UserId,
    connector: C,
    api: Arc<A>,

    state: ConnectionState,
    link: Option<Link>,
    active: Option<Chat>,
    /// Target of the latest open-chat request still in flight
    opening: Option<UserId>,

    presence: PresenceTracker,
    store: MessageStore,
    seen: SeenCoordinator,
    typing: TypingCoordinator,
    timers: TimerRegistry,

    actions: mpsc::UnboundedReceiver<UserAction>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions: mpsc::UnboundedReceiver<Completion>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl<C, A> SessionController<C, A>
where
    C: Connector,
    A: ChatApi,
{
    pub fn new(
        config: SyncConfig,
        local: UserId,
        connector: C,
        api: A,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (actions_tx, actions) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();

        let session = Self {
            store: MessageStore::new(config.seen_buffer_capacity),
            seen: SeenCoordinator::new(local.clone()),
            typing: TypingCoordinator::new(config.typing_idle, config.typing_expiry),
            config,
            local,
            connector,
            api: Arc::new(api),
            state: ConnectionState::Disconnected,
            link: None,
            active: None,
            opening: None,
            presence: PresenceTracker::new(),
            timers: TimerRegistry::new(),
            actions,
            completions_tx,
            completions,
            updates,
        };

        (session, SessionHandle { actions: actions_tx }, updates_rx)
    }

    pub fn local_user(&self) -> &UserId {
        &self.local
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn active_chat(&self) -> Option<&Chat> {
        self.active.as_ref()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Messages of the active chat.
    pub fn messages(&self) -> &[Message] {
        match &self.active {
            Some(chat) => self.store.messages(&chat.id),
            None => &[],
        }
    }

    pub fn is_remote_typing(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|chat| self.typing.is_remote_typing(&chat.id))
    }

    /// Drive the session until every `SessionHandle` is dropped.
    pub async fn run(mut self) {
        while self.step().await {}
        self.disconnect();
        info!(user_id = %self.local, "session closed");
    }

    /// Process one input. Returns false once no more actions can arrive.
    pub async fn step(&mut self) -> bool {
        tokio::select! {
            biased;

            event = next_transport(&mut self.link) => self.on_transport(event),
            Some(done) = self.completions.recv() => self.on_completion(done),
            action = self.actions.recv() => match action {
                Some(action) => self.on_action(action),
                None => return false,
            },
            kind = self.timers.expired() => self.on_timer(kind),
        }
        true
    }

    // -- Connection lifecycle --

    /// Start connecting. A no-op while connecting or connected.
    pub fn connect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            debug!(state = ?self.state, "connect ignored");
            return;
        }
        info!(user_id = %self.local, "connecting");
        self.link = Some(self.connector.connect());
        self.set_state(ConnectionState::Connecting);
    }

    /// Close the connection. The session stays usable; call `connect` again to resume.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        if self.state == ConnectionState::Connected {
            if let Some(chat_id) = self.typing.signaling().cloned() {
                let _ = self.send(ClientCommand::StopTyping(chat_id));
            }
        }
        self.link = None;
        self.drop_connection_state();
        info!(user_id = %self.local, "disconnected");
        self.set_state(ConnectionState::Disconnected);
    }

    /// Emit one command over the connection.
    pub fn send(&mut self, cmd: ClientCommand) -> Result<(), SyncError> {
        match (&self.state, &self.link) {
            (ConnectionState::Connected, Some(link)) => link.send(cmd),
            _ => {
                debug!("{} discarded: not connected", cmd.name());
                Err(SyncError::NotConnected)
            }
        }
    }

    /// Make `chat` the active chat and subscribe to it.
    ///
    /// The context switch happens even when offline; the join is then sent
    /// on the next successful connect and `NotConnected` is returned.
    pub fn join_chat(&mut self, chat: Chat) -> Result<(), SyncError> {
        if let Some(previous) = self.active.take() {
            if previous.id != chat.id {
                self.leave_chat(&previous.id);
            }
        }

        info!(chat_id = %chat.id, "joining chat");
        self.store.open(chat.id.clone());
        let chat_id = chat.id.clone();
        self.active = Some(chat);
        self.send(ClientCommand::JoinChat(chat_id))
    }

    fn leave_chat(&mut self, chat_id: &ChatId) {
        let was_typing = self.typing.is_remote_typing(chat_id);
        if let Some(stop) = self.typing.leave_chat(chat_id, &mut self.timers) {
            let _ = self.send(stop);
        }
        for message_id in self.store.drop_pending_scoped(chat_id) {
            self.timers.cancel(&TimerKind::SeenBuffer(message_id));
        }
        self.seen.reset();
        if was_typing {
            self.publish(SessionUpdate::RemoteTyping {
                chat_id: chat_id.clone(),
                typing: false,
            });
        }
    }

    /// Forget everything that only made sense on the connection that just went away.
    fn drop_connection_state(&mut self) {
        let was_typing = self.is_remote_typing();
        self.typing.reset(&mut self.timers);
        if was_typing {
            if let Some(chat_id) = self.active_id() {
                self.publish(SessionUpdate::RemoteTyping {
                    chat_id,
                    typing: false,
                });
            }
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.publish(SessionUpdate::State(state));
    }

    // -- Transport --

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                if self.state != ConnectionState::Connecting {
                    debug!(state = ?self.state, "unexpected connected event ignored");
                    return;
                }
                self.set_state(ConnectionState::Connected);
                info!(user_id = %self.local, "connected, sending setup");
                self.emit(ClientCommand::Setup(self.local.clone()));
                if let Some(chat_id) = self.active_id() {
                    self.emit(ClientCommand::JoinChat(chat_id));
                }
                self.acknowledge_visible();
            }
            TransportEvent::ConnectFailed(reason) => {
                warn!("connect failed: {}", reason);
                self.link = None;
                self.set_state(ConnectionState::Disconnected);
                self.report(SyncError::Connection(reason));
            }
            TransportEvent::Disconnected { reason } => {
                warn!("connection lost: {}", reason);
                self.link = None;
                self.drop_connection_state();
                self.set_state(ConnectionState::Disconnected);
                self.report(SyncError::Connection(reason));
            }
            TransportEvent::Event(event) => self.dispatch(event),
        }
    }

    fn dispatch(&mut self, event: ServerEvent) {
        let active = self.active_id();

        match event {
            ServerEvent::MessageReceived(msg) => {
                let chat_id = msg.chat_id.clone();
                let message_id = msg.id.clone();
                let appended = self.store.append(msg);

                if let Appended::Inserted {
                    resolved_pending: true,
                } = appended
                {
                    self.timers.cancel(&TimerKind::SeenBuffer(message_id));
                }

                if active.as_ref() != Some(&chat_id) {
                    self.stale(chat_id, "message received");
                    return;
                }
                match appended {
                    Appended::Inserted { .. } | Appended::Merged { changed: true } => {
                        self.publish_messages(&chat_id);
                        self.acknowledge_visible();
                    }
                    Appended::Merged { changed: false } | Appended::Dropped => {}
                }
            }
            ServerEvent::MessageSeenUpdate(receipt) => {
                let message_id = receipt.message_id.clone();
                match self.seen.apply(&mut self.store, receipt, active.as_ref()) {
                    SeenApplied::Updated {
                        chat_id,
                        changed: true,
                    } if active.as_ref() == Some(&chat_id) => {
                        self.publish_messages(&chat_id);
                    }
                    SeenApplied::Updated { .. } => {}
                    SeenApplied::Buffered { arm, evicted } => {
                        if let Some(evicted) = evicted {
                            self.timers.cancel(&TimerKind::SeenBuffer(evicted));
                        }
                        if arm {
                            self.timers.arm(
                                TimerKind::SeenBuffer(message_id),
                                self.config.seen_buffer_window,
                            );
                        }
                    }
                }
            }
            ServerEvent::Typing { chat_id } => {
                let Some(chat_id) = self.in_active(chat_id, active, "typing") else {
                    return;
                };
                if self.typing.remote_typing(&chat_id, &mut self.timers) {
                    self.publish(SessionUpdate::RemoteTyping {
                        chat_id,
                        typing: true,
                    });
                }
            }
            ServerEvent::StopTyping { chat_id } => {
                let Some(chat_id) = self.in_active(chat_id, active, "stop typing") else {
                    return;
                };
                if self.typing.remote_stopped(&chat_id, &mut self.timers) {
                    self.publish(SessionUpdate::RemoteTyping {
                        chat_id,
                        typing: false,
                    });
                }
            }
            ServerEvent::OnlineUsers(ids) => {
                debug!(count = ids.len(), "presence snapshot");
                self.presence
                    .load_snapshot(ids.into_iter().map(|id| PresenceEntry { id, online: true }));
                self.publish_presence();
            }
            ServerEvent::UserOnline(id) => {
                if self.presence.mark_online(id) {
                    self.publish_presence();
                }
            }
            ServerEvent::UserOffline(id) => {
                if self.presence.mark_offline(&id) {
                    self.publish_presence();
                }
            }
        }
    }

    /// Resolve the chat a typing event refers to, or drop it if that chat is not active.
    fn in_active(
        &self,
        scope: Option<ChatId>,
        active: Option<ChatId>,
        what: &'static str,
    ) -> Option<ChatId> {
        let active = active?;
        match scope {
            Some(chat_id) if chat_id != active => {
                self.stale(chat_id, what);
                None
            }
            _ => Some(active),
        }
    }

    fn stale(&self, chat_id: ChatId, what: &'static str) {
        debug!("{} dropped: {}", what, SyncError::StaleContext { chat_id });
    }

    // -- Timers --

    fn on_timer(&mut self, kind: TimerKind) {
        if let Some(chat_id) = kind.chat_id() {
            if self.active.as_ref().map(|c| &c.id) != Some(chat_id) {
                self.stale(chat_id.clone(), "timer");
                return;
            }
        }

        match kind {
            TimerKind::TypingIdle(chat_id) => {
                if let Some(stop) = self.typing.idle_elapsed(&chat_id) {
                    self.emit(stop);
                }
            }
            TimerKind::TypingExpiry(chat_id) => {
                if self.typing.remote_expired(&chat_id) {
                    debug!(chat_id = %chat_id, "remote typing indicator expired");
                    self.publish(SessionUpdate::RemoteTyping {
                        chat_id,
                        typing: false,
                    });
                }
            }
            TimerKind::SeenBuffer(message_id) => {
                if self.store.expire_pending(&message_id) {
                    debug!(message_id = %message_id, "buffered seen update expired");
                }
            }
        }
    }

    // -- UI actions --

    fn on_action(&mut self, action: UserAction) {
        let result = match action {
            UserAction::Connect => {
                self.connect();
                Ok(())
            }
            UserAction::Disconnect => {
                self.disconnect();
                Ok(())
            }
            UserAction::RefreshUsers => {
                self.refresh_users();
                Ok(())
            }
            UserAction::OpenChat(user) => {
                self.open_chat(user);
                Ok(())
            }
            UserAction::InputChanged => self.input_changed(),
            UserAction::SendText(text) => {
                if text.trim().is_empty() {
                    return;
                }
                self.send_message(|chat_id| SendMessageRequest::text(chat_id, text))
            }
            UserAction::SendAttachment(reference) => {
                if reference.trim().is_empty() {
                    return;
                }
                self.send_message(|chat_id| SendMessageRequest::attachment(chat_id, reference))
            }
            UserAction::UploadAvatar { file_name, data } => {
                let api = Arc::clone(&self.api);
                self.spawn_request(async move {
                    Completion::Avatar(api.upload_avatar(file_name, data).await)
                });
                Ok(())
            }
        };

        if let Err(e) = result {
            self.report(e);
        }
    }

    pub fn refresh_users(&mut self) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move { Completion::Users(api.fetch_users().await) });
    }

    /// Create or fetch the chat with `user`. The latest request wins.
    pub fn open_chat(&mut self, user: UserId) {
        self.opening = Some(user.clone());
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.access_chat(&user).await;
            Completion::ChatAccessed {
                target: user,
                result,
            }
        });
    }

    pub fn input_changed(&mut self) -> Result<(), SyncError> {
        let chat_id = self.active_id().ok_or(SyncError::NoActiveChat)?;
        if self.state != ConnectionState::Connected {
            return Err(SyncError::NotConnected);
        }
        match self.typing.input_changed(&chat_id, &mut self.timers) {
            Some(cmd) => self.send(cmd),
            None => Ok(()),
        }
    }

    fn send_message<F>(&mut self, build: F) -> Result<(), SyncError>
    where
        F: FnOnce(ChatId) -> SendMessageRequest,
    {
        let chat_id = self.active_id().ok_or(SyncError::NoActiveChat)?;
        if let Some(stop) = self.typing.message_sent(&chat_id, &mut self.timers) {
            self.emit(stop);
        }

        let req = build(chat_id);
        let api = Arc::clone(&self.api);
        self.spawn_request(async move { Completion::Sent(api.post_message(req).await) });
        Ok(())
    }

    fn spawn_request<F>(&self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = tx.send(request.await);
        });
    }

    // -- REST completions --

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Users(Ok(entries)) => {
                // Only some server versions carry a presence flag; without one
                // the push snapshot stays authoritative.
                if entries.iter().any(|e| e.online.is_some()) {
                    self.presence.load_snapshot(entries.iter().map(|e| PresenceEntry {
                        id: e.user.id.clone(),
                        online: e.online.unwrap_or(false),
                    }));
                    self.publish_presence();
                }
                let users = entries.into_iter().map(|e| e.user).collect();
                self.publish(SessionUpdate::UsersLoaded(users));
            }
            Completion::Users(Err(e)) => self.report(SyncError::Fetch(e)),

            Completion::ChatAccessed { target, result } => {
                if self.opening.as_ref() != Some(&target) {
                    debug!(user_id = %target, "superseded chat open ignored");
                    return;
                }
                self.opening = None;
                match result {
                    Ok(chat) => self.activate(chat),
                    Err(e) => self.report(SyncError::Fetch(e)),
                }
            }

            Completion::History { chat_id, result } => match result {
                Ok(history) => {
                    for message_id in self.store.load_history(&chat_id, history) {
                        self.timers.cancel(&TimerKind::SeenBuffer(message_id));
                    }
                    if self.active_id().as_ref() != Some(&chat_id) {
                        self.stale(chat_id, "history");
                        return;
                    }
                    self.publish_messages(&chat_id);
                    self.acknowledge_visible();
                }
                Err(e) => self.report(SyncError::Fetch(e)),
            },

            Completion::Sent(Ok(msg)) => {
                let chat_id = msg.chat_id.clone();
                self.store.append(msg.clone());
                if self.active_id().as_ref() == Some(&chat_id) {
                    self.publish_messages(&chat_id);
                }
                self.emit(ClientCommand::NewMessage(msg));
            }
            Completion::Sent(Err(e)) => {
                warn!("message send failed: {}", e);
                self.report(SyncError::SendFailure(e));
            }

            Completion::Avatar(Ok(user)) => self.publish(SessionUpdate::ProfileUpdated(user)),
            Completion::Avatar(Err(e)) => self.report(SyncError::SendFailure(e)),
        }
    }

    /// Switch to a freshly accessed chat and load its history.
    fn activate(&mut self, chat: Chat) {
        let chat_id = chat.id.clone();
        let peer = chat.peer_of(&self.local).cloned();

        if let Err(e) = self.join_chat(chat.clone()) {
            self.report(e);
        }
        self.publish(SessionUpdate::ChatOpened { chat, peer });
        // show whatever is cached while the fetch is in flight
        self.publish_messages(&chat_id);

        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.fetch_history(&chat_id).await;
            Completion::History { chat_id, result }
        });
    }

    // -- Seen receipts --

    /// Acknowledge everything visible in the active chat that we owe a receipt for.
    fn acknowledge_visible(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        let Some(chat) = &self.active else {
            return;
        };
        let receipts = self.seen.pending_receipts(self.store.messages(&chat.id));

        let mut receipts = receipts.into_iter();
        while let Some(receipt) = receipts.next() {
            let message_id = receipt.message_id.clone();
            if let Err(e) = self.send(ClientCommand::MessageSeen(receipt)) {
                // nothing from here on went out; the next pass owes all of it
                self.seen.forget(&message_id);
                for unsent in receipts {
                    self.seen.forget(&unsent.message_id);
                }
                self.report(e);
                break;
            }
        }
    }

    // -- Helpers --

    fn active_id(&self) -> Option<ChatId> {
        self.active.as_ref().map(|chat| chat.id.clone())
    }

    /// Send, reporting failure instead of returning it.
    fn emit(&mut self, cmd: ClientCommand) {
        if let Err(e) = self.send(cmd) {
            self.report(e);
        }
    }

    fn report(&self, error: SyncError) {
        debug!("reporting: {}", error);
        self.publish(SessionUpdate::Error(error));
    }

    fn publish(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }

    fn publish_messages(&self, chat_id: &ChatId) {
        self.publish(SessionUpdate::Messages {
            chat_id: chat_id.clone(),
            messages: self.store.messages(chat_id).to_vec(),
        });
    }

    fn publish_presence(&self) {
        self.publish(SessionUpdate::Presence(self.presence.online_users()));
    }
}

async fn next_transport(link: &mut Option<Link>) -> TransportEvent {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}
