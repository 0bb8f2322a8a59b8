use std::collections::HashSet;
use std::time::Duration;

use parley_types::{ChatId, ClientCommand};

use crate::timers::{TimerKind, TimerRegistry};

/// Typing signals in both directions.
///
/// Outbound: the first keystroke sends "typing", every keystroke restarts a
/// single idle timer, and the idle timer (or a send) sends "stop typing".
/// Inbound: a "typing" event shows the indicator and arms a safety expiry so
/// a lost "stop typing" cannot leave it on.
#[derive(Debug)]
pub struct TypingCoordinator {
    idle: Duration,
    expiry: Duration,
    signaling: Option<ChatId>,
    remote: HashSet<ChatId>,
}

impl TypingCoordinator {
    pub fn new(idle: Duration, expiry: Duration) -> Self {
        Self {
            idle,
            expiry,
            signaling: None,
            remote: HashSet::new(),
        }
    }

    /// The local input changed in `chat_id`.
    pub fn input_changed(
        &mut self,
        chat_id: &ChatId,
        timers: &mut TimerRegistry,
    ) -> Option<ClientCommand> {
        timers.arm(TimerKind::TypingIdle(chat_id.clone()), self.idle);

        if self.signaling.as_ref() == Some(chat_id) {
            return None;
        }
        self.signaling = Some(chat_id.clone());
        Some(ClientCommand::Typing(chat_id.clone()))
    }

    /// The idle timer for `chat_id` fired.
    pub fn idle_elapsed(&mut self, chat_id: &ChatId) -> Option<ClientCommand> {
        self.stop_signaling(chat_id)
    }

    /// A message is about to be sent from `chat_id`.
    pub fn message_sent(
        &mut self,
        chat_id: &ChatId,
        timers: &mut TimerRegistry,
    ) -> Option<ClientCommand> {
        timers.cancel(&TimerKind::TypingIdle(chat_id.clone()));
        self.stop_signaling(chat_id)
    }

    /// Remote "typing" for `chat_id`. Returns true if the indicator turned on.
    pub fn remote_typing(&mut self, chat_id: &ChatId, timers: &mut TimerRegistry) -> bool {
        timers.arm(TimerKind::TypingExpiry(chat_id.clone()), self.expiry);
        self.remote.insert(chat_id.clone())
    }

    /// Remote "stop typing" for `chat_id`. Returns true if the indicator turned off.
    pub fn remote_stopped(&mut self, chat_id: &ChatId, timers: &mut TimerRegistry) -> bool {
        timers.cancel(&TimerKind::TypingExpiry(chat_id.clone()));
        self.remote.remove(chat_id)
    }

    /// The safety expiry for `chat_id` fired.
    pub fn remote_expired(&mut self, chat_id: &ChatId) -> bool {
        self.remote.remove(chat_id)
    }

    pub fn is_remote_typing(&self, chat_id: &ChatId) -> bool {
        self.remote.contains(chat_id)
    }

    pub fn signaling(&self) -> Option<&ChatId> {
        self.signaling.as_ref()
    }

    /// Leaving `chat_id`: drop its timers and indicator, and stop signaling there.
    pub fn leave_chat(
        &mut self,
        chat_id: &ChatId,
        timers: &mut TimerRegistry,
    ) -> Option<ClientCommand> {
        timers.cancel_chat(chat_id);
        self.remote.remove(chat_id);
        self.stop_signaling(chat_id)
    }

    /// Connection lost: nothing typed or shown survives it.
    pub fn reset(&mut self, timers: &mut TimerRegistry) {
        if let Some(chat_id) = self.signaling.take() {
            timers.cancel(&TimerKind::TypingIdle(chat_id));
        }
        for chat_id in self.remote.drain() {
            timers.cancel(&TimerKind::TypingExpiry(chat_id));
        }
    }

    fn stop_signaling(&mut self, chat_id: &ChatId) -> Option<ClientCommand> {
        if self.signaling.as_ref() != Some(chat_id) {
            return None;
        }
        self.signaling = None;
        Some(ClientCommand::StopTyping(chat_id.clone()))
    }
}
