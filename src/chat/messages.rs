//! REST endpoints for message CRUD and read receipts.
//!
//! Every mutation persists through the store first, then requests fanout:
//! room-scoped delivery to connections currently viewing the conversation,
//! plus per-user delivery so participants who haven't joined the room in
//! this session still hear about new messages.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::Claims;
use crate::realtime::events;
use crate::state::AppState;
use crate::store::{LastMessage, MessageRecord, NewMessage};

/// Maximum message text length (chars).
const MAX_TEXT_LENGTH: usize = 4000;
/// Default page size for message history.
const DEFAULT_LIMIT: u32 = 50;
/// Maximum page size for message history.
const MAX_LIMIT: u32 = 100;
/// Messages older than this cannot be edited.
const EDIT_WINDOW_HOURS: i64 = 48;
/// Text shown in place of a message deleted for everyone.
const DELETED_TEXT: &str = "This message was deleted";

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub chat_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub text: String,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub read_by: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl MessageResponse {
    fn from_record(record: MessageRecord) -> Self {
        let text = if record.deleted {
            DELETED_TEXT.to_string()
        } else {
            record.text
        };
        Self {
            id: record.id,
            chat_id: record.chat_id,
            sender_id: record.sender_id,
            text,
            edited: record.edited,
            edited_at: record.edited_at,
            deleted: record.deleted,
            read_by: record.read_by,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub messages: Vec<MessageResponse>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    #[serde(default)]
    pub for_everyone: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    pub chat_id: String,
    pub message_ids: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: u64,
}

// --- Fanout payloads (delivered verbatim by the hub) ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageEditedEvent {
    message_id: String,
    chat_id: String,
    text: String,
    is_edited: bool,
    edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageDeletedEvent {
    message_id: String,
    chat_id: String,
    for_everyone: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MessagesReadEvent {
    chat_id: String,
    read_by: String,
}

// --- Handlers ---

/// POST /api/messages
/// Persist a message, then notify the chat room and every other participant's
/// per-user channel.
pub async fn send_message(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), StatusCode> {
    let text = body.text.trim().to_string();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let store = state.store.clone();
    let sender = claims.sub.clone();
    let chat_id = body.chat_id.clone();

    let (record, participants) = tokio::task::spawn_blocking(move || {
        // Participant check before anything is written or fanned out.
        let chat = store
            .chat_by_id(&chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if !chat.has_participant(&sender) {
            return Err(StatusCode::NOT_FOUND);
        }

        let record = store
            .insert_message(NewMessage {
                chat_id: chat_id.clone(),
                sender_id: sender.clone(),
                text,
            })
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        store
            .set_last_message(
                &chat_id,
                &LastMessage {
                    text: record.text.clone(),
                    sender_id: sender.clone(),
                    created_at: record.created_at,
                },
            )
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok((record, chat.participants))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    let response = MessageResponse::from_record(record);

    // Room first, then personal channels for participants not watching the
    // room in this session. Clients dedupe by message id.
    state
        .hub
        .emit_to_room(&response.chat_id, events::MESSAGE_NEW, &response);
    for participant in &participants {
        if participant != &response.sender_id {
            state
                .hub
                .emit_to_user(participant, events::MESSAGE_NEW, &response);
        }
    }

    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/messages/{chat_id}?before=&limit=
/// Paginated history, newest first. Messages the caller deleted for
/// themselves are filtered out; tombstones keep their slot.
pub async fn get_messages(
    State(state): State<AppState>,
    claims: Claims,
    Path(chat_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT) as usize;

    let store = state.store.clone();
    let caller = claims.sub.clone();
    let before = query.before;

    let (messages, has_more) = tokio::task::spawn_blocking(move || {
        let chat = store
            .chat_by_id(&chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if !chat.has_participant(&caller) {
            return Err(StatusCode::NOT_FOUND);
        }

        let page = store
            .messages_for_chat(&chat_id, before, limit + 1)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let has_more = page.len() > limit;

        let messages: Vec<MessageResponse> = page
            .into_iter()
            .take(limit)
            .filter(|m| !m.deleted_for.iter().any(|u| u == &caller))
            .map(MessageResponse::from_record)
            .collect();

        Ok((messages, has_more))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    Ok(Json(HistoryResponse { messages, has_more }))
}

/// PUT /api/messages/{id}
/// Sender-only, within the edit window.
pub async fn edit_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Json(body): Json<EditMessageRequest>,
) -> Result<Json<MessageResponse>, StatusCode> {
    let text = body.text.trim().to_string();
    if text.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    if text.len() > MAX_TEXT_LENGTH {
        return Err(StatusCode::PAYLOAD_TOO_LARGE);
    }

    let store = state.store.clone();
    let caller = claims.sub.clone();
    let id = message_id.clone();

    let updated = tokio::task::spawn_blocking(move || {
        let message = store
            .message_by_id(&id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if message.sender_id != caller {
            return Err(StatusCode::FORBIDDEN);
        }
        if message.deleted {
            return Err(StatusCode::BAD_REQUEST);
        }
        if Utc::now() - message.created_at > Duration::hours(EDIT_WINDOW_HOURS) {
            return Err(StatusCode::BAD_REQUEST);
        }

        store
            .apply_edit(&id, &text, Utc::now())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state.hub.emit_to_room(
        &updated.chat_id,
        events::MESSAGE_EDITED,
        &MessageEditedEvent {
            message_id: updated.id.clone(),
            chat_id: updated.chat_id.clone(),
            text: updated.text.clone(),
            is_edited: true,
            edited_at: updated.edited_at,
        },
    );

    Ok(Json(MessageResponse::from_record(updated)))
}

/// DELETE /api/messages/{id}?forEveryone=
/// Tombstone for everyone (sender only, with a room event), or hide for the
/// caller alone (no event).
pub async fn delete_message(
    State(state): State<AppState>,
    claims: Claims,
    Path(message_id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, StatusCode> {
    let store = state.store.clone();
    let caller = claims.sub.clone();
    let id = message_id.clone();
    let for_everyone = query.for_everyone;

    let deleted_for_everyone = tokio::task::spawn_blocking(move || {
        let message = store
            .message_by_id(&id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        let chat = store
            .chat_by_id(&message.chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if !chat.has_participant(&caller) {
            return Err(StatusCode::FORBIDDEN);
        }

        if for_everyone && message.sender_id == caller {
            store
                .mark_deleted(&id)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(Some(message.chat_id))
        } else {
            store
                .mark_deleted_for(&id, &caller)
                .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
            Ok(None)
        }
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    if let Some(chat_id) = deleted_for_everyone {
        state.hub.emit_to_room(
            &chat_id,
            events::MESSAGE_DELETED,
            &MessageDeletedEvent {
                message_id,
                chat_id: chat_id.clone(),
                for_everyone: true,
            },
        );
    }

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/messages/read
/// Mark messages read and tell the room who read them.
pub async fn mark_read(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let store = state.store.clone();
    let caller = claims.sub.clone();
    let chat_id = body.chat_id.clone();
    let message_ids = body.message_ids.clone();

    let marked = tokio::task::spawn_blocking(move || {
        let chat = store
            .chat_by_id(&chat_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;
        if !chat.has_participant(&caller) {
            return Err(StatusCode::NOT_FOUND);
        }

        store
            .mark_read(&chat_id, &caller, message_ids.as_deref())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    state.hub.emit_to_room(
        &body.chat_id,
        events::MESSAGES_READ,
        &MessagesReadEvent {
            chat_id: body.chat_id.clone(),
            read_by: claims.sub.clone(),
        },
    );

    Ok(Json(MarkReadResponse { marked }))
}
