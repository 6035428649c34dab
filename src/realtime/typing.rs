//! Typing tracker: per-(room, user) `NotTyping -> Typing -> NotTyping`
//! state machine with scheduled expiry.
//!
//! Only edge transitions are reported to the caller; a `begin` on an entry
//! that is already typing refreshes the expiry without a new event, so the
//! event rate tracks state changes rather than keystrokes.
//!
//! Each entry stores the abort handle of its expiry task plus an epoch. The
//! handle is aborted on every explicit stop/refresh/clear; the epoch guards
//! the window where a timer already fired but lost the race to a concurrent
//! stop — whichever path removes the entry first emits the single stop event.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::AbortHandle;

use crate::realtime::{RoomId, UserId};

struct TypingEntry {
    epoch: u64,
    expiry: Option<AbortHandle>,
}

/// Outcome of a `begin` call.
pub enum TypingBegin {
    /// NotTyping -> Typing: the caller must emit `isTyping: true`.
    Started { epoch: u64 },
    /// Already typing: expiry refreshed, no event.
    Refreshed { epoch: u64 },
}

impl TypingBegin {
    pub fn epoch(&self) -> u64 {
        match self {
            TypingBegin::Started { epoch } | TypingBegin::Refreshed { epoch } => *epoch,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, TypingBegin::Started { .. })
    }
}

#[derive(Default)]
pub struct TypingTracker {
    inner: Mutex<HashMap<RoomId, HashMap<UserId, TypingEntry>>>,
    next_epoch: AtomicU64,
}

impl TypingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter (or refresh) the Typing state. Aborts the previous expiry task
    /// if one was armed; the caller schedules a replacement and passes its
    /// handle to [`TypingTracker::arm`] with the returned epoch.
    pub fn begin(&self, room_id: &str, user_id: &str) -> TypingBegin {
        let epoch = self.next_epoch.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let room = inner.entry(room_id.to_string()).or_default();
        match room.entry(user_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if let Some(handle) = entry.expiry.take() {
                    handle.abort();
                }
                entry.epoch = epoch;
                TypingBegin::Refreshed { epoch }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(TypingEntry {
                    epoch,
                    expiry: None,
                });
                TypingBegin::Started { epoch }
            }
        }
    }

    /// Attach the expiry task handle for the entry created at `epoch`. If the
    /// state moved on while the task was being spawned, the new handle is
    /// aborted instead.
    pub fn arm(&self, room_id: &str, user_id: &str, epoch: u64, handle: AbortHandle) {
        let mut inner = self.inner.lock();
        match inner
            .get_mut(room_id)
            .and_then(|room| room.get_mut(user_id))
        {
            Some(entry) if entry.epoch == epoch => entry.expiry = Some(handle),
            _ => handle.abort(),
        }
    }

    /// Force the NotTyping state (explicit stop, or the user leaving the
    /// room). Returns true iff the prior state was Typing — the caller emits
    /// the stop event only on that edge.
    pub fn end(&self, room_id: &str, user_id: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(room) = inner.get_mut(room_id) else {
            return false;
        };
        let Some(entry) = room.remove(user_id) else {
            return false;
        };
        if let Some(handle) = entry.expiry {
            handle.abort();
        }
        if room.is_empty() {
            inner.remove(room_id);
        }
        true
    }

    /// Expiry-task path: equivalent to an implicit stop, but only if the
    /// entry still belongs to `epoch`. A stale timer that lost the race to a
    /// stop (or to a fresh `begin`) finds a mismatch and does nothing.
    pub fn expire(&self, room_id: &str, user_id: &str, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        let Some(room) = inner.get_mut(room_id) else {
            return false;
        };
        match room.get(user_id) {
            Some(entry) if entry.epoch == epoch => {}
            _ => return false,
        }
        room.remove(user_id);
        if room.is_empty() {
            inner.remove(room_id);
        }
        true
    }

    /// Clear every typing entry for a user (disconnect path). Returns the
    /// rooms where the user actually was typing, so the caller can emit one
    /// stop event per affected room and nothing for the rest.
    pub fn clear_user(&self, user_id: &str) -> Vec<RoomId> {
        let mut inner = self.inner.lock();
        let mut cleared = Vec::new();
        inner.retain(|room_id, room| {
            if let Some(entry) = room.remove(user_id) {
                if let Some(handle) = entry.expiry {
                    handle.abort();
                }
                cleared.push(room_id.clone());
            }
            !room.is_empty()
        });
        cleared
    }

    pub fn is_typing(&self, room_id: &str, user_id: &str) -> bool {
        self.inner
            .lock()
            .get(room_id)
            .is_some_and(|room| room.contains_key(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_twice_reports_one_edge() {
        let tracker = TypingTracker::new();

        assert!(tracker.begin("r1", "alice").is_started());
        assert!(!tracker.begin("r1", "alice").is_started());
        assert!(tracker.is_typing("r1", "alice"));
    }

    #[test]
    fn end_reports_edge_only_when_typing() {
        let tracker = TypingTracker::new();

        // Stop with no prior start: no event.
        assert!(!tracker.end("r1", "alice"));

        tracker.begin("r1", "alice");
        assert!(tracker.end("r1", "alice"));
        // Second stop: state already NotTyping.
        assert!(!tracker.end("r1", "alice"));
    }

    #[test]
    fn expire_honors_epoch() {
        let tracker = TypingTracker::new();

        let first = tracker.begin("r1", "alice").epoch();
        // Refresh bumps the epoch; the old timer's expire must be a no-op.
        let second = tracker.begin("r1", "alice").epoch();
        assert!(!tracker.expire("r1", "alice", first));
        assert!(tracker.is_typing("r1", "alice"));

        assert!(tracker.expire("r1", "alice", second));
        assert!(!tracker.is_typing("r1", "alice"));
        // Timer firing after an explicit stop already removed the entry.
        assert!(!tracker.expire("r1", "alice", second));
    }

    #[test]
    fn clear_user_returns_only_rooms_where_typing() {
        let tracker = TypingTracker::new();

        tracker.begin("r1", "alice");
        tracker.begin("r2", "alice");
        tracker.begin("r2", "bob");

        let mut cleared = tracker.clear_user("alice");
        cleared.sort();
        assert_eq!(cleared, vec!["r1", "r2"]);
        assert!(tracker.is_typing("r2", "bob"));

        // Nothing left to clear.
        assert!(tracker.clear_user("alice").is_empty());
    }
}
