//! Account endpoints: register, login, logout.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::auth::jwt::{self, Claims};
use crate::auth::password;
use crate::state::AppState;
use crate::store::StoreError;
use crate::users::UserResponse;

#[derive(Debug, Deserialize)]
pub struct CredentialsRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

/// POST /api/auth/register
pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<(StatusCode, Json<UserResponse>), StatusCode> {
    let username = body.username.trim().to_string();
    if password::validate_username(&username).is_err()
        || password::validate_password(&body.password).is_err()
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    let hash = password::hash_password(&body.password);
    let store = state.store.clone();
    let name = username.clone();

    let created = tokio::task::spawn_blocking(move || store.create_user(&name, &hash))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    match created {
        Ok(user) => {
            tracing::info!(user_id = %user.id, username = %user.username, "user registered");
            Ok((
                StatusCode::CREATED,
                Json(UserResponse::from_record(&user, false)),
            ))
        }
        Err(StoreError::Conflict(_)) => Err(StatusCode::CONFLICT),
        Err(_) => Err(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// POST /api/auth/login
/// Invalid username and invalid password are indistinguishable to callers.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<CredentialsRequest>,
) -> Result<Json<LoginResponse>, StatusCode> {
    let store = state.store.clone();
    let username = body.username.trim().to_string();

    let user = tokio::task::spawn_blocking(move || store.user_by_username(&username))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !password::verify_password(&body.password, &user.password_hash) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let store = state.store.clone();
    let user_id = user.id.clone();
    let now = Utc::now();
    let _ = tokio::task::spawn_blocking(move || store.touch_last_seen(&user_id, now)).await;

    let token =
        jwt::issue_token(&state.jwt_secret, &user.id).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = %user.id, "user logged in");

    let online = state.hub.is_online(&user.id);
    Ok(Json(LoginResponse {
        token,
        user: UserResponse::from_record(&user, online),
    }))
}

/// POST /api/auth/logout
/// Revokes the presented token until its natural expiry.
pub async fn logout(
    State(state): State<AppState>,
    claims: Claims,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    // The Claims extractor already validated this exact header.
    let token = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let hash = jwt::token_hash(token);
    let expires_at = chrono::DateTime::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now);

    let store = state.store.clone();
    let user_id = claims.sub.clone();
    tokio::task::spawn_blocking(move || store.blacklist_token(&hash, &user_id, expires_at))
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    tracing::info!(user_id = %claims.sub, "token revoked");
    Ok(StatusCode::OK)
}
