//! Room membership table.
//!
//! Forward index (room -> connections) and inverse index (connection ->
//! rooms) under one lock, so neither is ever visible mid-update relative to
//! the other. Rooms are conversation ids owned by the store; an id that was
//! never joined is simply an empty room.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;

use crate::realtime::{ConnectionId, RoomId};

#[derive(Default)]
struct RoomsInner {
    members: HashMap<RoomId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<RoomId>>,
}

#[derive(Default)]
pub struct RoomTable {
    inner: Mutex<RoomsInner>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a room. Idempotent.
    pub fn join(&self, room_id: &str, conn_id: ConnectionId) {
        let mut inner = self.inner.lock();
        inner
            .members
            .entry(room_id.to_string())
            .or_default()
            .insert(conn_id);
        inner
            .joined
            .entry(conn_id)
            .or_default()
            .insert(room_id.to_string());
    }

    /// Unsubscribe a connection from a room. Leaving a room that was never
    /// joined is a no-op. Empty room entries are pruned.
    pub fn leave(&self, room_id: &str, conn_id: ConnectionId) {
        let mut inner = self.inner.lock();
        if let Some(conns) = inner.members.get_mut(room_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                inner.members.remove(room_id);
            }
        }
        if let Some(rooms) = inner.joined.get_mut(&conn_id) {
            rooms.remove(room_id);
            if rooms.is_empty() {
                inner.joined.remove(&conn_id);
            }
        }
    }

    /// Remove a connection from every room it had joined and return exactly
    /// the affected room ids. Unknown connections return an empty set.
    pub fn leave_all(&self, conn_id: ConnectionId) -> Vec<RoomId> {
        let mut inner = self.inner.lock();
        let Some(rooms) = inner.joined.remove(&conn_id) else {
            return Vec::new();
        };
        for room_id in &rooms {
            if let Some(conns) = inner.members.get_mut(room_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    inner.members.remove(room_id);
                }
            }
        }
        rooms.into_iter().collect()
    }

    /// Snapshot of a room's current members, for fanout resolution.
    pub fn members_of(&self, room_id: &str) -> Vec<ConnectionId> {
        self.inner
            .lock()
            .members
            .get(room_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rooms a connection is currently subscribed to.
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<RoomId> {
        self.inner
            .lock()
            .joined
            .get(&conn_id)
            .map(|rooms| rooms.iter().cloned().collect())
            .unwrap_or_default()
    }
}
