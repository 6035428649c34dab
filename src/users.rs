//! User listing endpoints. Last-seen comes from the store; the live `online`
//! flag is read from the presence registry.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::jwt::Claims;
use crate::state::AppState;
use crate::store::UserRecord;

const LIST_LIMIT: usize = 50;
const SEARCH_LIMIT: usize = 20;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub online: bool,
}

impl UserResponse {
    pub fn from_record(user: &UserRecord, online: bool) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            created_at: user.created_at,
            last_seen: user.last_seen,
            online,
        }
    }
}

/// GET /api/users — other users, with presence.
pub async fn list_users(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Vec<UserResponse>>, StatusCode> {
    let store = state.store.clone();
    let caller = claims.sub.clone();

    let users = tokio::task::spawn_blocking(move || store.list_users(&caller, LIST_LIMIT))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(with_presence(&state, users)))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

/// GET /api/users/search?query= — substring match on username.
pub async fn search_users(
    State(state): State<AppState>,
    claims: Claims,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<UserResponse>>, StatusCode> {
    let needle = params.query.trim().to_string();
    if needle.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let store = state.store.clone();
    let caller = claims.sub.clone();

    let users =
        tokio::task::spawn_blocking(move || store.search_users(&needle, &caller, SEARCH_LIMIT))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(with_presence(&state, users)))
}

/// GET /api/users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    _claims: Claims,
    Path(user_id): Path<String>,
) -> Result<Json<UserResponse>, StatusCode> {
    let store = state.store.clone();
    let id = user_id.clone();

    let user = tokio::task::spawn_blocking(move || store.user_by_id(&id))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let online = state.hub.is_online(&user.id);
    Ok(Json(UserResponse::from_record(&user, online)))
}

fn with_presence(state: &AppState, users: Vec<UserRecord>) -> Vec<UserResponse> {
    users
        .iter()
        .map(|user| UserResponse::from_record(user, state.hub.is_online(&user.id)))
        .collect()
}
