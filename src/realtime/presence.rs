//! Presence registry: which users have at least one live connection.
//!
//! A user is online iff their connection set is non-empty. The set and the
//! last-seen map share one lock so `unregister` observes "set just became
//! empty" atomically with the removal.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::realtime::{ConnectionId, UserId};

#[derive(Default)]
struct PresenceInner {
    online: HashMap<UserId, HashSet<ConnectionId>>,
    last_seen: HashMap<UserId, DateTime<Utc>>,
}

#[derive(Default)]
pub struct PresenceRegistry {
    inner: Mutex<PresenceInner>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a user's set, creating the entry on first
    /// connection. Idempotent for a repeated (user, connection) pair.
    pub fn register(&self, user_id: &str, conn_id: ConnectionId) {
        let mut inner = self.inner.lock();
        inner
            .online
            .entry(user_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    /// Remove a connection from a user's set.
    ///
    /// Returns true iff this was the user's last connection — the signal the
    /// lifecycle manager uses to stamp last-seen and broadcast offline.
    /// Unknown users and unknown connections are a no-op returning false.
    pub fn unregister(&self, user_id: &str, conn_id: ConnectionId) -> bool {
        let mut inner = self.inner.lock();
        let Some(conns) = inner.online.get_mut(user_id) else {
            return false;
        };
        if !conns.remove(&conn_id) {
            return false;
        }
        if conns.is_empty() {
            inner.online.remove(user_id);
            return true;
        }
        false
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.inner.lock().online.contains_key(user_id)
    }

    /// Point-in-time copy of the online user set. Sent to newly
    /// authenticated connections; stale the moment the lock drops.
    pub fn snapshot(&self) -> Vec<UserId> {
        self.inner.lock().online.keys().cloned().collect()
    }

    /// Live connections for one user, for per-user fanout.
    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .online
            .get(user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Record the moment a user's presence flipped online -> offline.
    pub fn mark_offline(&self, user_id: &str, at: DateTime<Utc>) {
        self.inner.lock().last_seen.insert(user_id.to_string(), at);
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.inner.lock().last_seen.get(user_id).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn online_iff_net_registrations_positive() {
        let registry = PresenceRegistry::new();
        let (c1, c2) = (ConnectionId::new(), ConnectionId::new());

        assert!(!registry.is_online("alice"));
        registry.register("alice", c1);
        assert!(registry.is_online("alice"));
        registry.register("alice", c2);
        assert!(registry.is_online("alice"));

        assert!(!registry.unregister("alice", c1));
        assert!(registry.is_online("alice"));
        assert!(registry.unregister("alice", c2));
        assert!(!registry.is_online("alice"));
    }

    #[test]
    fn unregister_reports_only_the_one_to_zero_edge() {
        let registry = PresenceRegistry::new();
        let conn = ConnectionId::new();

        // Never registered: no-op, never reports offline.
        assert!(!registry.unregister("ghost", conn));

        registry.register("bob", conn);
        assert!(registry.unregister("bob", conn));
        // Second unregister for the same pair is a no-op.
        assert!(!registry.unregister("bob", conn));
    }

    #[test]
    fn register_is_idempotent_per_pair() {
        let registry = PresenceRegistry::new();
        let conn = ConnectionId::new();

        registry.register("alice", conn);
        registry.register("alice", conn);
        // One logical connection: the first unregister takes the user offline.
        assert!(registry.unregister("alice", conn));
    }

    #[test]
    fn snapshot_is_a_copy_of_current_keys() {
        let registry = PresenceRegistry::new();
        registry.register("alice", ConnectionId::new());
        registry.register("bob", ConnectionId::new());

        let mut snap = registry.snapshot();
        snap.sort();
        assert_eq!(snap, vec!["alice".to_string(), "bob".to_string()]);
    }

    #[test]
    fn last_seen_stamped_on_mark_offline() {
        let registry = PresenceRegistry::new();
        assert!(registry.last_seen("alice").is_none());

        let at = Utc::now();
        registry.mark_offline("alice", at);
        assert_eq!(registry.last_seen("alice"), Some(at));
    }
}
