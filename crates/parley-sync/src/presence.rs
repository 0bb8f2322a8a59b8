use std::collections::HashMap;

use parley_types::UserId;
use parley_types::api::PresenceEntry;

/// Tracks who is online as known to this client.
///
/// Snapshots replace the whole set; join/leave events patch it in arrival
/// order. Unknown users read as offline.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: HashMap<UserId, bool>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entire set.
    pub fn load_snapshot<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = PresenceEntry>,
    {
        self.online = entries.into_iter().map(|e| (e.id, e.online)).collect();
    }

    /// Returns true if the user was not already online.
    pub fn mark_online(&mut self, id: UserId) -> bool {
        self.online.insert(id, true) != Some(true)
    }

    /// Returns true if the user was online. Untracked users are left untracked.
    pub fn mark_offline(&mut self, id: &UserId) -> bool {
        match self.online.get_mut(id) {
            Some(online) => std::mem::replace(online, false),
            None => false,
        }
    }

    pub fn is_online(&self, id: &UserId) -> bool {
        self.online.get(id).copied().unwrap_or(false)
    }

    /// Online users, sorted for stable output.
    pub fn online_users(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self
            .online
            .iter()
            .filter(|(_, online)| **online)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}
