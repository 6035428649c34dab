//! Wire-level event catalog.
//!
//! Outbound frames are `{"event": <name>, "data": <payload>}` JSON text
//! messages; inbound client traffic decodes into [`ClientRequest`] before any
//! state transition happens. Payload field names are camelCase, timestamps
//! RFC 3339.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::realtime::{RoomId, UserId};

// Outbound event names.
pub const USERS_ONLINE: &str = "users:online";
pub const USER_ONLINE: &str = "user:online";
pub const USER_OFFLINE: &str = "user:offline";
pub const TYPING_UPDATE: &str = "typing:update";
pub const MESSAGE_NEW: &str = "message:new";
pub const MESSAGE_EDITED: &str = "message:edited";
pub const MESSAGE_DELETED: &str = "message:deleted";
pub const MESSAGES_READ: &str = "messages:read";
pub const ERROR: &str = "error";

/// Envelope serialized once per emission and cloned to every target.
#[derive(Debug, Serialize)]
pub(crate) struct OutboundFrame<'a, T: Serialize> {
    pub event: &'a str,
    pub data: &'a T,
}

/// `user:online` — broadcast on every successful authentication.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnline {
    pub user_id: UserId,
}

/// `user:offline` — broadcast once, when a user's last connection closes.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOffline {
    pub user_id: UserId,
    pub last_seen: DateTime<Utc>,
}

/// `typing:update` — room-scoped, edge-triggered.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub is_typing: bool,
}

/// `error` — sent back to the offending connection only.
#[derive(Debug, Serialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Requests a client may issue over an authenticated connection.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", content = "data")]
pub enum ClientRequest {
    #[serde(rename = "room:join", rename_all = "camelCase")]
    RoomJoin { room_id: RoomId },
    #[serde(rename = "room:leave", rename_all = "camelCase")]
    RoomLeave { room_id: RoomId },
    #[serde(rename = "typing:start", rename_all = "camelCase")]
    TypingStart { room_id: RoomId },
    #[serde(rename = "typing:stop", rename_all = "camelCase")]
    TypingStop { room_id: RoomId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_requests() {
        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"room:join","data":{"roomId":"r1"}}"#).unwrap();
        assert_eq!(
            req,
            ClientRequest::RoomJoin {
                room_id: "r1".to_string()
            }
        );

        let req: ClientRequest =
            serde_json::from_str(r#"{"event":"typing:start","data":{"roomId":"r2"}}"#).unwrap();
        assert_eq!(
            req,
            ClientRequest::TypingStart {
                room_id: "r2".to_string()
            }
        );
    }

    #[test]
    fn rejects_unknown_event() {
        let res = serde_json::from_str::<ClientRequest>(
            r#"{"event":"room:nuke","data":{"roomId":"r1"}}"#,
        );
        assert!(res.is_err());
    }

    #[test]
    fn outbound_frame_shape() {
        let frame = OutboundFrame {
            event: TYPING_UPDATE,
            data: &TypingUpdate {
                room_id: "r1".to_string(),
                user_id: "alice".to_string(),
                is_typing: true,
            },
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["event"], "typing:update");
        assert_eq!(json["data"]["roomId"], "r1");
        assert_eq!(json["data"]["isTyping"], true);
    }
}
