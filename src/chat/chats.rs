//! REST endpoints for conversations (private and group chats).
//!
//! Chats are store entities; the realtime layer only ever sees their ids as
//! room ids.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::Claims;
use crate::state::AppState;
use crate::store::{ChatKind, ChatRecord, LastMessage};

// --- Request / Response types ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrivateChatRequest {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupChatRequest {
    pub name: String,
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessageResponse {
    pub text: String,
    pub sender_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub id: String,
    pub kind: &'static str,
    pub name: Option<String>,
    pub participants: Vec<String>,
    pub admins: Vec<String>,
    pub created_by: String,
    pub last_message: Option<LastMessageResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatResponse {
    fn from_record(chat: ChatRecord) -> Self {
        Self {
            id: chat.id,
            kind: chat.kind.as_str(),
            name: chat.name,
            participants: chat.participants,
            admins: chat.admins,
            created_by: chat.created_by,
            last_message: chat.last_message.map(|last: LastMessage| LastMessageResponse {
                text: last.text,
                sender_id: last.sender_id,
                created_at: last.created_at,
            }),
            created_at: chat.created_at,
            updated_at: chat.updated_at,
        }
    }
}

// --- Handlers ---

/// POST /api/chats/private
/// Find-or-create the private conversation between the caller and one peer.
pub async fn create_private_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreatePrivateChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), StatusCode> {
    let caller = claims.sub.clone();
    let peer = body.user_id.clone();
    if peer == caller {
        return Err(StatusCode::BAD_REQUEST);
    }

    let store = state.store.clone();
    let result = tokio::task::spawn_blocking(move || {
        if store.user_by_id(&peer)?.is_none() {
            return Ok(None);
        }
        if let Some(existing) = store.private_chat_between(&caller, &peer)? {
            return Ok(Some((existing, false)));
        }
        let chat = store.create_chat(
            ChatKind::Private,
            None,
            &[caller.clone(), peer.clone()],
            &caller,
        )?;
        Ok(Some((chat, true)))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_: crate::store::StoreError| StatusCode::INTERNAL_SERVER_ERROR)?;

    match result {
        Some((chat, created)) => {
            let status = if created {
                StatusCode::CREATED
            } else {
                StatusCode::OK
            };
            Ok((status, Json(ChatResponse::from_record(chat))))
        }
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// POST /api/chats/group
/// Create a group chat; the creator becomes an admin and is always a member.
pub async fn create_group_chat(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<CreateGroupChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), StatusCode> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let caller = claims.sub.clone();
    let mut participants = body.participant_ids.clone();
    if !participants.iter().any(|p| p == &caller) {
        participants.push(caller.clone());
    }
    participants.sort();
    participants.dedup();
    if participants.len() < 2 {
        return Err(StatusCode::BAD_REQUEST);
    }

    let store = state.store.clone();
    let chat = tokio::task::spawn_blocking(move || {
        store.create_chat(ChatKind::Group, Some(&name), &participants, &caller)
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok((StatusCode::CREATED, Json(ChatResponse::from_record(chat))))
}

/// GET /api/chats — the caller's conversations, most recently updated first.
pub async fn list_chats(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<ChatResponse>>, StatusCode> {
    let store = state.store.clone();
    let caller = claims.sub.clone();

    let chats = tokio::task::spawn_blocking(move || store.chats_for_user(&caller))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(chats.into_iter().map(ChatResponse::from_record).collect()))
}
