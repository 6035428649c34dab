//! Event fanout: deliver one logical event to every connection in a target
//! set (room, user, or all).
//!
//! The frame is serialized once and cloned per recipient. Target sets are
//! snapshots resolved under the owning map's lock; delivery happens after the
//! lock is released, over each connection's unbounded channel, so a slow
//! client never stalls joins, leaves, or other fanouts. A connection that
//! closed between resolution and delivery is skipped silently — fanout is
//! best-effort over currently-live connections and reports nothing back.

use axum::extract::ws::Message;
use serde::Serialize;

use crate::realtime::events::OutboundFrame;
use crate::realtime::{ConnectionId, RealtimeHub};

impl RealtimeHub {
    /// Deliver an event to every connection currently subscribed to a room,
    /// in emission order relative to this caller.
    pub fn emit_to_room<T: Serialize>(&self, room_id: &str, event: &str, data: &T) {
        let Some(message) = encode(event, data) else {
            return;
        };
        let members = self.rooms.members_of(room_id);
        self.deliver(&members, &message);
    }

    /// Deliver an event to every live connection of one user, regardless of
    /// which rooms (if any) those connections joined.
    pub fn emit_to_user<T: Serialize>(&self, user_id: &str, event: &str, data: &T) {
        let Some(message) = encode(event, data) else {
            return;
        };
        let targets = self.presence.connections_of(user_id);
        self.deliver(&targets, &message);
    }

    /// Deliver an event to every live connection. Used for the global
    /// presence broadcasts only.
    pub fn emit_to_all<T: Serialize>(&self, event: &str, data: &T) {
        let Some(message) = encode(event, data) else {
            return;
        };
        for entry in self.connections.iter() {
            let _ = entry.value().sender.send(message.clone());
        }
    }

    /// Connection-scoped send (online snapshot, protocol errors).
    pub(crate) fn send_to_connection<T: Serialize>(
        &self,
        conn_id: ConnectionId,
        event: &str,
        data: &T,
    ) {
        let Some(message) = encode(event, data) else {
            return;
        };
        if let Some(handle) = self.connections.get(&conn_id) {
            let _ = handle.sender.send(message);
        }
    }

    fn deliver(&self, targets: &[ConnectionId], message: &Message) {
        for conn_id in targets {
            if let Some(handle) = self.connections.get(conn_id) {
                let _ = handle.sender.send(message.clone());
            }
        }
    }
}

fn encode<T: Serialize>(event: &str, data: &T) -> Option<Message> {
    match serde_json::to_string(&OutboundFrame { event, data }) {
        Ok(text) => Some(Message::Text(text.into())),
        Err(error) => {
            tracing::warn!(event = %event, error = %error, "failed to encode frame");
            None
        }
    }
}
