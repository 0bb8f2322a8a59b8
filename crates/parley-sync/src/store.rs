use std::collections::{BTreeSet, HashMap, VecDeque};

use tracing::debug;

use parley_types::{ChatId, Message, MessageId, SeenReceipt, UserId};

/// Outcome of [`MessageStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// New message at the tail of its chat. `resolved_pending` is set when a
    /// buffered seen update was waiting for it.
    Inserted { resolved_pending: bool },
    /// Already present; only `seen_by` was merged.
    Merged { changed: bool },
    /// The chat is not cached, so the message was not kept.
    Dropped,
}

/// Outcome of [`MessageStore::apply_seen`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeenApplied {
    Updated { chat_id: ChatId, changed: bool },
    /// Message not known yet. `arm` is set for a fresh buffer entry; `evicted`
    /// names the oldest entry pushed out to make room.
    Buffered { arm: bool, evicted: Option<MessageId> },
}

#[derive(Debug)]
struct PendingSeen {
    users: BTreeSet<UserId>,
    /// Chat that was active when the update was buffered
    scope: Option<ChatId>,
}

/// Per-chat message logs keyed by server id.
///
/// Each log keeps source order; nothing is re-sorted. A message id appears at
/// most once across the store and its `seen_by` set only grows.
#[derive(Debug)]
pub struct MessageStore {
    chats: HashMap<ChatId, Vec<Message>>,
    index: HashMap<MessageId, (ChatId, usize)>,
    pending: HashMap<MessageId, PendingSeen>,
    pending_order: VecDeque<MessageId>,
    pending_capacity: usize,
}

impl MessageStore {
    pub fn new(pending_capacity: usize) -> Self {
        Self {
            chats: HashMap::new(),
            index: HashMap::new(),
            pending: HashMap::new(),
            pending_order: VecDeque::new(),
            pending_capacity: pending_capacity.max(1),
        }
    }

    /// Start caching `chat_id`. Returns false if it was already cached.
    pub fn open(&mut self, chat_id: ChatId) -> bool {
        if self.chats.contains_key(&chat_id) {
            return false;
        }
        self.chats.insert(chat_id, Vec::new());
        true
    }

    pub fn is_cached(&self, chat_id: &ChatId) -> bool {
        self.chats.contains_key(chat_id)
    }

    pub fn messages(&self, chat_id: &ChatId) -> &[Message] {
        self.chats.get(chat_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let (chat_id, pos) = self.index.get(id)?;
        self.chats.get(chat_id)?.get(*pos)
    }

    pub fn len(&self, chat_id: &ChatId) -> usize {
        self.messages(chat_id).len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Replace a chat's log with a history snapshot.
    ///
    /// Seen sets of messages already held are unioned in, and messages that
    /// arrived by push while the fetch was in flight (not in the snapshot, not
    /// older than its tail) stay at the end. Returns the ids whose buffered
    /// seen updates were applied.
    pub fn load_history(&mut self, chat_id: &ChatId, history: Vec<Message>) -> Vec<MessageId> {
        let previous = self.chats.remove(chat_id).unwrap_or_default();
        for msg in &previous {
            self.index.remove(&msg.id);
        }

        let mut log: Vec<Message> = Vec::with_capacity(history.len());
        let mut positions: HashMap<MessageId, usize> = HashMap::new();

        for msg in history {
            if msg.chat_id != *chat_id {
                debug!(chat_id = %chat_id, message_id = %msg.id, "history entry for another chat, skipped");
                continue;
            }
            match positions.get(&msg.id) {
                Some(&pos) => {
                    log[pos].merge_seen(msg.seen_by);
                }
                None => {
                    positions.insert(msg.id.clone(), log.len());
                    log.push(msg);
                }
            }
        }

        let tail = log.last().map(|m| m.created_at);
        for old in previous {
            match positions.get(&old.id) {
                Some(&pos) => {
                    log[pos].merge_seen(old.seen_by);
                }
                None if tail.is_none_or(|t| old.created_at >= t) => {
                    positions.insert(old.id.clone(), log.len());
                    log.push(old);
                }
                None => {}
            }
        }

        let mut resolved = Vec::new();
        for (pos, msg) in log.iter_mut().enumerate() {
            self.index.insert(msg.id.clone(), (chat_id.clone(), pos));
            if let Some(pending) = self.pending.remove(&msg.id) {
                msg.merge_seen(pending.users);
                resolved.push(msg.id.clone());
            }
        }
        if !resolved.is_empty() {
            self.pending_order.retain(|id| !resolved.contains(id));
        }

        self.chats.insert(chat_id.clone(), log);
        resolved
    }

    /// Insert at the tail of the message's chat, or merge `seen_by` into the
    /// existing record with the same id.
    pub fn append(&mut self, mut msg: Message) -> Appended {
        if let Some((chat_id, pos)) = self.index.get(&msg.id) {
            let changed = self
                .chats
                .get_mut(chat_id)
                .and_then(|log| log.get_mut(*pos))
                .is_some_and(|existing| existing.merge_seen(msg.seen_by));
            return Appended::Merged { changed };
        }

        let Some(log) = self.chats.get_mut(&msg.chat_id) else {
            return Appended::Dropped;
        };

        let resolved_pending = match self.pending.remove(&msg.id) {
            Some(pending) => {
                msg.merge_seen(pending.users);
                self.pending_order.retain(|id| *id != msg.id);
                true
            }
            None => false,
        };

        self.index
            .insert(msg.id.clone(), (msg.chat_id.clone(), log.len()));
        log.push(msg);
        Appended::Inserted { resolved_pending }
    }

    /// Union the receipt's user into the message's `seen_by`, or buffer it
    /// until the message shows up. `scope` is the chat active right now.
    pub fn apply_seen(&mut self, receipt: SeenReceipt, scope: Option<&ChatId>) -> SeenApplied {
        let SeenReceipt {
            message_id,
            user_id,
        } = receipt;

        if let Some((chat_id, pos)) = self.index.get(&message_id) {
            let changed = self
                .chats
                .get_mut(chat_id)
                .and_then(|log| log.get_mut(*pos))
                .is_some_and(|msg| msg.mark_seen(user_id));
            return SeenApplied::Updated {
                chat_id: chat_id.clone(),
                changed,
            };
        }

        if let Some(pending) = self.pending.get_mut(&message_id) {
            pending.users.insert(user_id);
            return SeenApplied::Buffered {
                arm: false,
                evicted: None,
            };
        }

        let evicted = if self.pending.len() >= self.pending_capacity {
            self.pending_order.pop_front().inspect(|oldest| {
                self.pending.remove(oldest);
                debug!(message_id = %oldest, "seen buffer full, evicted oldest entry");
            })
        } else {
            None
        };

        self.pending.insert(
            message_id.clone(),
            PendingSeen {
                users: BTreeSet::from([user_id]),
                scope: scope.cloned(),
            },
        );
        self.pending_order.push_back(message_id);

        SeenApplied::Buffered { arm: true, evicted }
    }

    /// Forget a buffered update whose window elapsed. Returns false if it was
    /// already resolved.
    pub fn expire_pending(&mut self, message_id: &MessageId) -> bool {
        if self.pending.remove(message_id).is_none() {
            return false;
        }
        self.pending_order.retain(|id| id != message_id);
        true
    }

    /// Drop buffered updates recorded while `chat_id` was active.
    pub fn drop_pending_scoped(&mut self, chat_id: &ChatId) -> Vec<MessageId> {
        let dropped: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, p)| p.scope.as_ref() == Some(chat_id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &dropped {
            self.pending.remove(id);
        }
        if !dropped.is_empty() {
            self.pending_order.retain(|id| !dropped.contains(id));
        }
        dropped
    }
}
