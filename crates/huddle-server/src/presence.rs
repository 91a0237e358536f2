//! Which identities are online, and through how many connections.
//!
//! Only the 0 -> 1 and 1 -> 0 transitions of an identity's connection count
//! are visible to callers; extra tabs and devices never flap presence.

use std::collections::HashSet;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use huddle_shared::types::{ConnectionId, IdentityId};

/// Identity -> live connections. An identity is present in the map exactly
/// while it has at least one connection; every bucket is mutated under its
/// shard lock.
#[derive(Default)]
pub struct PresenceRegistry {
    online: DashMap<IdentityId, HashSet<ConnectionId>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a live connection. Returns `true` when this is the identity's
    /// first one.
    ///
    /// `on_online` runs on that transition while the identity's bucket is
    /// still locked, so a concurrent last-disconnect of the same identity
    /// cannot announce itself out of order. It must not call back into this
    /// registry.
    pub fn register(
        &self,
        identity: IdentityId,
        connection: ConnectionId,
        on_online: impl FnOnce(),
    ) -> bool {
        match self.online.entry(identity) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().insert(connection);
                false
            }
            Entry::Vacant(entry) => {
                let _bucket = entry.insert(HashSet::from([connection]));
                on_online();
                true
            }
        }
    }

    /// Forget a connection. Returns `true` when it was the identity's last
    /// one, in which case the identity is no longer online. `on_offline`
    /// runs under the same lock as in [`register`](Self::register).
    pub fn unregister(
        &self,
        identity: IdentityId,
        connection: ConnectionId,
        on_offline: impl FnOnce(),
    ) -> bool {
        match self.online.entry(identity) {
            Entry::Occupied(mut entry) => {
                if !entry.get_mut().remove(&connection) || !entry.get().is_empty() {
                    return false;
                }
                on_offline();
                entry.remove();
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    /// Online identities, sorted for stable output.
    pub fn snapshot(&self) -> Vec<IdentityId> {
        let mut ids: Vec<IdentityId> = self.online.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    #[cfg(test)]
    pub fn is_online(&self, identity: IdentityId) -> bool {
        self.online.contains_key(&identity)
    }

    #[cfg(test)]
    pub fn connection_count(&self, identity: IdentityId) -> usize {
        self.online.get(&identity).map(|set| set.len()).unwrap_or(0)
    }

    pub fn online_count(&self) -> usize {
        self.online.len()
    }
}
