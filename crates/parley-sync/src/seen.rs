use std::collections::HashSet;

use tracing::debug;

use parley_types::{ChatId, Message, MessageId, SeenReceipt, UserId};

use crate::store::{MessageStore, SeenApplied};

/// Decides which read receipts the local user owes, and feeds inbound
/// receipts into the store.
///
/// A receipt goes out at most once per message per viewing session, so
/// repeated passes before the server echoes the update back stay quiet.
#[derive(Debug)]
pub struct SeenCoordinator {
    local: UserId,
    acknowledged: HashSet<MessageId>,
}

impl SeenCoordinator {
    pub fn new(local: UserId) -> Self {
        Self {
            local,
            acknowledged: HashSet::new(),
        }
    }

    /// Start a new viewing session (the active chat changed).
    pub fn reset(&mut self) {
        self.acknowledged.clear();
    }

    /// Receipts to emit for the visible message list.
    pub fn pending_receipts(&mut self, visible: &[Message]) -> Vec<SeenReceipt> {
        let receipts: Vec<SeenReceipt> = visible
            .iter()
            .filter(|msg| msg.sender != self.local && !msg.is_seen_by(&self.local))
            .filter(|msg| self.acknowledged.insert(msg.id.clone()))
            .map(|msg| SeenReceipt {
                message_id: msg.id.clone(),
                user_id: self.local.clone(),
            })
            .collect();

        if !receipts.is_empty() {
            debug!(count = receipts.len(), "acknowledging visible messages");
        }
        receipts
    }

    /// A receipt could not be delivered; let the next pass retry it.
    pub fn forget(&mut self, message_id: &MessageId) {
        self.acknowledged.remove(message_id);
    }

    /// Apply a receipt from the server, whoever it came from.
    pub fn apply(
        &self,
        store: &mut MessageStore,
        receipt: SeenReceipt,
        active: Option<&ChatId>,
    ) -> SeenApplied {
        let message_id = receipt.message_id.clone();
        let applied = store.apply_seen(receipt, active);
        if let SeenApplied::Buffered { arm: true, .. } = applied {
            debug!(message_id = %message_id, "seen update for unknown message, buffered");
        }
        applied
    }
}
