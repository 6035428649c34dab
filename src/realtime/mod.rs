//! Real-time presence, room membership, typing, and event fanout.
//!
//! All shared realtime state is owned by [`RealtimeHub`], constructed once at
//! startup and handed to every connection actor and HTTP handler — never
//! reached through globals. The hub's connect/disconnect/join/leave/typing
//! methods are the only writers of the underlying maps; everything else reads
//! snapshots or requests fanout by target id.

pub mod events;
pub mod fanout;
pub mod presence;
pub mod rooms;
pub mod typing;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::realtime::events::{TypingUpdate, UserOffline, UserOnline};
use crate::realtime::presence::PresenceRegistry;
use crate::realtime::rooms::RoomTable;
use crate::realtime::typing::TypingTracker;

pub type UserId = String;
pub type RoomId = String;

/// Opaque identifier for one live transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sender half of a connection's outbound channel. Any part of the system
/// can clone this to push frames to that client; the connection's writer
/// task owns the receiver.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

/// Live connection: the owning user (fixed at authentication) and its
/// outbound channel.
struct ConnectionHandle {
    user_id: UserId,
    sender: ConnectionSender,
}

/// Shared realtime state and the connection lifecycle entry points.
pub struct RealtimeHub {
    /// ConnectionId -> live handle. Fanout resolves targets here; a missing
    /// entry means the connection closed between resolution and delivery.
    connections: DashMap<ConnectionId, ConnectionHandle>,
    presence: PresenceRegistry,
    rooms: RoomTable,
    typing: TypingTracker,
    typing_timeout: Duration,
}

impl RealtimeHub {
    pub fn new(typing_timeout: Duration) -> Self {
        Self {
            connections: DashMap::new(),
            presence: PresenceRegistry::new(),
            rooms: RoomTable::new(),
            typing: TypingTracker::new(),
            typing_timeout,
        }
    }

    /// Register an authenticated connection: track it, mark the user online,
    /// broadcast `user:online`, and send the online snapshot to the new
    /// connection only.
    ///
    /// The caller has already verified the credential — a connection that
    /// fails authentication never reaches the hub.
    pub fn connect(&self, conn_id: ConnectionId, user_id: &str, sender: ConnectionSender) {
        self.connections.insert(
            conn_id,
            ConnectionHandle {
                user_id: user_id.to_string(),
                sender,
            },
        );
        self.presence.register(user_id, conn_id);

        tracing::debug!(user_id = %user_id, conn_id = %conn_id, "connection registered");

        self.emit_to_all(
            events::USER_ONLINE,
            &UserOnline {
                user_id: user_id.to_string(),
            },
        );
        self.send_to_connection(conn_id, events::USERS_ONLINE, &self.presence.snapshot());
    }

    /// Tear down a connection: clear its user's typing entries, leave every
    /// room, and unregister presence. If this was the user's last live
    /// connection, stamp last-seen, broadcast `user:offline`, and return the
    /// stamped instant so the caller can persist it.
    ///
    /// Idempotent: a second invocation for the same connection (transport
    /// error followed by explicit close) is a no-op.
    pub fn disconnect(&self, conn_id: ConnectionId) -> Option<DateTime<Utc>> {
        let (_, handle) = self.connections.remove(&conn_id)?;
        let user_id = handle.user_id;

        for room_id in self.typing.clear_user(&user_id) {
            self.emit_to_room(
                &room_id,
                events::TYPING_UPDATE,
                &TypingUpdate {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                    is_typing: false,
                },
            );
        }

        self.rooms.leave_all(conn_id);

        if self.presence.unregister(&user_id, conn_id) {
            let last_seen = Utc::now();
            self.presence.mark_offline(&user_id, last_seen);
            self.emit_to_all(
                events::USER_OFFLINE,
                &UserOffline {
                    user_id: user_id.clone(),
                    last_seen,
                },
            );
            tracing::info!(user_id = %user_id, conn_id = %conn_id, "user offline");
            return Some(last_seen);
        }

        tracing::debug!(
            user_id = %user_id,
            conn_id = %conn_id,
            "connection closed, user still online"
        );
        None
    }

    /// Subscribe a connection to a room. Membership is permissive here:
    /// access control happens in the HTTP layer before any fanout is
    /// requested for a room.
    pub fn join_room(&self, conn_id: ConnectionId, room_id: &str) {
        self.rooms.join(room_id, conn_id);
        tracing::debug!(conn_id = %conn_id, room_id = %room_id, "joined room");
    }

    /// Unsubscribe a connection from a room, clearing the user's typing
    /// state there (with a stop event only if they actually were typing).
    pub fn leave_room(&self, conn_id: ConnectionId, room_id: &str) {
        self.rooms.leave(room_id, conn_id);
        if let Some(user_id) = self.user_of(conn_id) {
            if self.typing.end(room_id, &user_id) {
                self.emit_to_room(
                    room_id,
                    events::TYPING_UPDATE,
                    &TypingUpdate {
                        room_id: room_id.to_string(),
                        user_id,
                        is_typing: false,
                    },
                );
            }
        }
        tracing::debug!(conn_id = %conn_id, room_id = %room_id, "left room");
    }

    /// Typing start: on the NotTyping -> Typing edge, broadcast
    /// `isTyping: true` to the room; when already typing, only refresh the
    /// expiry. Either way a fresh expiry task is scheduled and its handle
    /// stored, replacing (and aborting) the previous one.
    pub fn typing_start(self: &Arc<Self>, conn_id: ConnectionId, room_id: &str) {
        let Some(user_id) = self.user_of(conn_id) else {
            return;
        };

        let begin = self.typing.begin(room_id, &user_id);
        let epoch = begin.epoch();

        let hub = Arc::clone(self);
        let room = room_id.to_string();
        let user = user_id.clone();
        let timeout = self.typing_timeout;
        let expiry = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            hub.typing_expired(&room, &user, epoch);
        });
        self.typing.arm(room_id, &user_id, epoch, expiry.abort_handle());

        if begin.is_started() {
            self.emit_to_room(
                room_id,
                events::TYPING_UPDATE,
                &TypingUpdate {
                    room_id: room_id.to_string(),
                    user_id,
                    is_typing: true,
                },
            );
        }
    }

    /// Explicit typing stop. Emits the stop event only on the
    /// Typing -> NotTyping edge; a stop with no prior start is a no-op.
    pub fn typing_stop(&self, conn_id: ConnectionId, room_id: &str) {
        let Some(user_id) = self.user_of(conn_id) else {
            return;
        };
        if self.typing.end(room_id, &user_id) {
            self.emit_to_room(
                room_id,
                events::TYPING_UPDATE,
                &TypingUpdate {
                    room_id: room_id.to_string(),
                    user_id,
                    is_typing: false,
                },
            );
        }
    }

    /// Expiry-task landing point: an implicit stop, raced against explicit
    /// stops via the entry epoch so at most one stop event is emitted.
    fn typing_expired(&self, room_id: &str, user_id: &str, epoch: u64) {
        if self.typing.expire(room_id, user_id, epoch) {
            self.emit_to_room(
                room_id,
                events::TYPING_UPDATE,
                &TypingUpdate {
                    room_id: room_id.to_string(),
                    user_id: user_id.to_string(),
                    is_typing: false,
                },
            );
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.presence.is_online(user_id)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.presence.snapshot()
    }

    pub fn last_seen(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.presence.last_seen(user_id)
    }

    fn user_of(&self, conn_id: ConnectionId) -> Option<UserId> {
        self.connections
            .get(&conn_id)
            .map(|handle| handle.user_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use serde_json::Value;
    use tokio::sync::mpsc::UnboundedReceiver;

    const TYPING_TIMEOUT: Duration = Duration::from_secs(5);

    fn hub() -> Arc<RealtimeHub> {
        Arc::new(RealtimeHub::new(TYPING_TIMEOUT))
    }

    /// Attach a fake connection and return its receiving end.
    fn attach(hub: &RealtimeHub, user: &str) -> (ConnectionId, UnboundedReceiver<Message>) {
        let conn_id = ConnectionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        hub.connect(conn_id, user, tx);
        (conn_id, rx)
    }

    /// Pop the next frame, decoded to (event, data).
    fn next_frame(rx: &mut UnboundedReceiver<Message>) -> Option<(String, Value)> {
        match rx.try_recv().ok()? {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).ok()?;
                Some((
                    value["event"].as_str().unwrap_or_default().to_string(),
                    value["data"].clone(),
                ))
            }
            _ => None,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Message>) {
        while rx.try_recv().is_ok() {}
    }

    #[tokio::test]
    async fn connect_broadcasts_online_then_sends_snapshot() {
        let hub = hub();
        let (_a, mut rx_a) = attach(&hub, "alice");

        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "user:online");
        assert_eq!(data["userId"], "alice");

        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "users:online");
        assert_eq!(data, serde_json::json!(["alice"]));

        // A second user: alice sees the broadcast, bob gets both users in
        // his snapshot.
        let (_b, mut rx_b) = attach(&hub, "bob");
        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "user:online");
        assert_eq!(data["userId"], "bob");

        let (_, _) = next_frame(&mut rx_b).unwrap(); // bob's own user:online
        let (event, data) = next_frame(&mut rx_b).unwrap();
        assert_eq!(event, "users:online");
        let mut users: Vec<String> = data
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u.as_str().unwrap().to_string())
            .collect();
        users.sort();
        assert_eq!(users, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn room_events_reach_only_current_members() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, mut rx_b) = attach(&hub, "bob");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.join_room(conn_a, "r1");
        hub.emit_to_room("r1", "message:new", &serde_json::json!({"id": "m1"}));

        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "message:new");
        assert_eq!(data["id"], "m1");
        assert!(next_frame(&mut rx_b).is_none(), "bob never joined r1");

        hub.join_room(conn_b, "r1");
        hub.emit_to_room("r1", "message:new", &serde_json::json!({"id": "m2"}));
        assert_eq!(next_frame(&mut rx_a).unwrap().1["id"], "m2");
        assert_eq!(next_frame(&mut rx_b).unwrap().1["id"], "m2");
    }

    #[tokio::test]
    async fn per_room_emission_order_is_preserved() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, mut rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);
        drain(&mut rx_b);

        hub.emit_to_room("r1", "message:new", &serde_json::json!({"id": "m1"}));
        hub.emit_to_room("r1", "message:edited", &serde_json::json!({"id": "m1"}));

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(next_frame(rx).unwrap().0, "message:new");
            assert_eq!(next_frame(rx).unwrap().0, "message:edited");
        }
    }

    #[tokio::test]
    async fn emit_to_user_reaches_every_connection_of_that_user() {
        let hub = hub();
        let (_a1, mut rx_a1) = attach(&hub, "alice");
        let (_a2, mut rx_a2) = attach(&hub, "alice");
        let (_b, mut rx_b) = attach(&hub, "bob");
        drain(&mut rx_a1);
        drain(&mut rx_a2);
        drain(&mut rx_b);

        hub.emit_to_user("alice", "message:new", &serde_json::json!({"id": "m1"}));
        assert_eq!(next_frame(&mut rx_a1).unwrap().0, "message:new");
        assert_eq!(next_frame(&mut rx_a2).unwrap().0, "message:new");
        assert!(next_frame(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn last_connection_closing_broadcasts_offline_once() {
        let hub = hub();
        let (a1, mut rx_a1) = attach(&hub, "alice");
        let (a2, _rx_a2) = attach(&hub, "alice");
        let (_b, mut rx_b) = attach(&hub, "bob");
        drain(&mut rx_a1);
        drain(&mut rx_b);

        assert!(hub.disconnect(a1).is_none());
        assert!(hub.is_online("alice"));
        assert!(
            next_frame(&mut rx_b).is_none(),
            "no offline while a tab remains"
        );

        let stamped = hub.disconnect(a2);
        assert!(stamped.is_some());
        assert!(!hub.is_online("alice"));
        assert_eq!(hub.last_seen("alice"), stamped);

        let (event, data) = next_frame(&mut rx_b).unwrap();
        assert_eq!(event, "user:offline");
        assert_eq!(data["userId"], "alice");
        assert!(data["lastSeen"].is_string());
        assert!(
            next_frame(&mut rx_b).is_none(),
            "offline broadcast exactly once"
        );

        // Double disconnect is a no-op.
        assert!(hub.disconnect(a2).is_none());
        assert!(next_frame(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn typing_edges_produce_exactly_one_event_each() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, _rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);

        hub.typing_start(conn_b, "r1");
        hub.typing_start(conn_b, "r1");

        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "typing:update");
        assert_eq!(data["userId"], "bob");
        assert_eq!(data["isTyping"], true);
        assert!(next_frame(&mut rx_a).is_none(), "repeated start is silent");

        hub.typing_stop(conn_b, "r1");
        let (_, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(data["isTyping"], false);

        hub.typing_stop(conn_b, "r1");
        assert!(next_frame(&mut rx_a).is_none(), "repeated stop is silent");
    }

    #[tokio::test(start_paused = true)]
    async fn typing_expires_without_explicit_stop() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, _rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);

        hub.typing_start(conn_b, "r1");
        assert_eq!(next_frame(&mut rx_a).unwrap().1["isTyping"], true);

        tokio::time::sleep(TYPING_TIMEOUT + Duration::from_secs(1)).await;

        let (_, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(data["isTyping"], false);
        assert!(next_frame(&mut rx_a).is_none());

        // Explicit stop after expiry: state already NotTyping, no event.
        hub.typing_stop(conn_b, "r1");
        assert!(next_frame(&mut rx_a).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn typing_refresh_postpones_expiry() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, _rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);

        hub.typing_start(conn_b, "r1");
        drain(&mut rx_a);

        // Refresh just before the deadline; the original timer must not fire.
        tokio::time::sleep(TYPING_TIMEOUT - Duration::from_secs(1)).await;
        hub.typing_start(conn_b, "r1");
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(
            next_frame(&mut rx_a).is_none(),
            "refreshed entry outlives the first deadline"
        );

        tokio::time::sleep(TYPING_TIMEOUT).await;
        assert_eq!(next_frame(&mut rx_a).unwrap().1["isTyping"], false);
    }

    #[tokio::test]
    async fn disconnect_clears_typing_with_one_stop_event() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, _rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);

        hub.typing_start(conn_b, "r1");
        drain(&mut rx_a);

        hub.disconnect(conn_b);

        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "typing:update");
        assert_eq!(data["userId"], "bob");
        assert_eq!(data["isTyping"], false);

        // Followed by bob's offline broadcast, and nothing else.
        let (event, _) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "user:offline");
        assert!(next_frame(&mut rx_a).is_none());
    }

    #[tokio::test]
    async fn disconnect_without_typing_emits_no_typing_event() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, _rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);

        hub.disconnect(conn_b);

        let (event, _) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "user:offline", "no spurious typing stop");
    }

    #[tokio::test]
    async fn leave_room_stops_typing_for_remaining_members() {
        let hub = hub();
        let (conn_a, mut rx_a) = attach(&hub, "alice");
        let (conn_b, _rx_b) = attach(&hub, "bob");
        hub.join_room(conn_a, "r1");
        hub.join_room(conn_b, "r1");
        drain(&mut rx_a);

        hub.typing_start(conn_b, "r1");
        drain(&mut rx_a);

        hub.leave_room(conn_b, "r1");
        let (event, data) = next_frame(&mut rx_a).unwrap();
        assert_eq!(event, "typing:update");
        assert_eq!(data["isTyping"], false);
    }
}
