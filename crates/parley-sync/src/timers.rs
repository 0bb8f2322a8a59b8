use std::collections::HashMap;
use std::future::poll_fn;
use std::task::Poll;
use std::time::Duration;

use tokio_util::time::DelayQueue;
use tokio_util::time::delay_queue::Key;

use parley_types::{ChatId, MessageId};

/// A delayed action. At most one timer per kind is armed at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Local input went quiet; send "stop typing"
    TypingIdle(ChatId),
    /// Remote typing indicator safety expiry
    TypingExpiry(ChatId),
    /// Give up on a seen update whose message never showed up
    SeenBuffer(MessageId),
}

impl TimerKind {
    pub fn chat_id(&self) -> Option<&ChatId> {
        match self {
            Self::TypingIdle(chat_id) | Self::TypingExpiry(chat_id) => Some(chat_id),
            Self::SeenBuffer(_) => None,
        }
    }
}

/// Owns every pending delayed action of a session.
///
/// Backed by a tokio `DelayQueue`, so arming must happen inside a runtime.
pub struct TimerRegistry {
    queue: DelayQueue<TimerKind>,
    keys: HashMap<TimerKind, Key>,
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            queue: DelayQueue::new(),
            keys: HashMap::new(),
        }
    }

    /// Arm `kind` to fire after `delay`. Re-arming restarts the countdown.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration) {
        if let Some(key) = self.keys.get(&kind) {
            self.queue.reset(key, delay);
            return;
        }
        let key = self.queue.insert(kind.clone(), delay);
        self.keys.insert(kind, key);
    }

    /// Disarm `kind`. Returns false if it was not armed.
    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        match self.keys.remove(kind) {
            Some(key) => {
                self.queue.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Disarm every timer scoped to `chat_id`.
    pub fn cancel_chat(&mut self, chat_id: &ChatId) -> usize {
        let scoped: Vec<TimerKind> = self
            .keys
            .keys()
            .filter(|kind| kind.chat_id() == Some(chat_id))
            .cloned()
            .collect();
        for kind in &scoped {
            self.cancel(kind);
        }
        scoped.len()
    }

    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.keys.contains_key(kind)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Resolves with the next timer to fire. Never resolves while nothing is armed.
    pub async fn expired(&mut self) -> TimerKind {
        poll_fn(|cx| match self.queue.poll_expired(cx) {
            Poll::Ready(Some(expired)) => {
                let kind = expired.into_inner();
                self.keys.remove(&kind);
                Poll::Ready(kind)
            }
            Poll::Ready(None) | Poll::Pending => Poll::Pending,
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn assert_elapsed(start: Instant, expected: Duration) {
        let elapsed = start.elapsed();
        assert!(
            elapsed >= expected && elapsed < expected + Duration::from_millis(5),
            "elapsed {:?}, expected {:?}",
            elapsed,
            expected
        );
    }

    fn idle(chat: &str) -> TimerKind {
        TimerKind::TypingIdle(chat.into())
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let mut timers = TimerRegistry::new();
        let start = Instant::now();
        timers.arm(idle("c1"), Duration::from_millis(3000));

        assert_eq!(timers.expired().await, idle("c1"));
        assert_elapsed(start, Duration::from_millis(3000));
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_restarts_countdown() {
        let mut timers = TimerRegistry::new();
        let start = Instant::now();
        timers.arm(idle("c1"), Duration::from_millis(3000));

        tokio::time::advance(Duration::from_millis(2000)).await;
        timers.arm(idle("c1"), Duration::from_millis(3000));
        assert_eq!(timers.len(), 1);

        assert_eq!(timers.expired().await, idle("c1"));
        assert_elapsed(start, Duration::from_millis(5000));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_chat_only_touches_that_chat() {
        let mut timers = TimerRegistry::new();
        timers.arm(idle("c1"), Duration::from_millis(10));
        timers.arm(TimerKind::TypingExpiry("c1".into()), Duration::from_millis(10));
        timers.arm(TimerKind::TypingExpiry("c2".into()), Duration::from_millis(20));
        timers.arm(TimerKind::SeenBuffer("m1".into()), Duration::from_millis(30));

        assert_eq!(timers.cancel_chat(&"c1".into()), 2);
        assert!(!timers.cancel(&idle("c1")));

        assert_eq!(timers.expired().await, TimerKind::TypingExpiry("c2".into()));
        assert_eq!(timers.expired().await, TimerKind::SeenBuffer("m1".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_registry_stays_pending() {
        let mut timers = TimerRegistry::new();
        let outcome =
            tokio::time::timeout(Duration::from_secs(60), timers.expired()).await;
        assert!(outcome.is_err());
    }
}
