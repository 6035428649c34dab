use std::sync::Arc;

use crate::realtime::events::{self, ClientRequest, ErrorEvent};
use crate::realtime::{ConnectionId, RealtimeHub};

/// Handle one inbound text frame: decode the tagged request and dispatch to
/// the hub. Malformed frames get an error event back on this connection only
/// and cause no state change.
pub fn handle_text_frame(
    text: &str,
    hub: &Arc<RealtimeHub>,
    conn_id: ConnectionId,
    user_id: &str,
) {
    let request = match serde_json::from_str::<ClientRequest>(text) {
        Ok(request) => request,
        Err(error) => {
            tracing::warn!(
                user_id = %user_id,
                conn_id = %conn_id,
                error = %error,
                "Failed to decode client frame"
            );
            hub.send_to_connection(
                conn_id,
                events::ERROR,
                &ErrorEvent {
                    message: "malformed frame".to_string(),
                },
            );
            return;
        }
    };

    match request {
        ClientRequest::RoomJoin { room_id } => hub.join_room(conn_id, &room_id),
        ClientRequest::RoomLeave { room_id } => hub.leave_room(conn_id, &room_id),
        ClientRequest::TypingStart { room_id } => hub.typing_start(conn_id, &room_id),
        ClientRequest::TypingStop { room_id } => hub.typing_stop(conn_id, &room_id),
    }
}
