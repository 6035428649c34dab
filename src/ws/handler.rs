use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::auth::jwt::{self, AuthError};
use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for the WebSocket connection. Auth is via `?token=JWT`
/// since browsers cannot set headers on WebSocket upgrades.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// WebSocket close codes:
/// 4001 = token expired
/// 4002 = token invalid / revoked / missing
const CLOSE_TOKEN_EXPIRED: u16 = 4001;
const CLOSE_TOKEN_INVALID: u16 = 4002;

/// GET /ws?token=JWT
/// WebSocket upgrade endpoint. On auth failure, upgrades then immediately
/// closes with the appropriate close code — nothing is registered for a
/// failed authentication. On success, spawns the connection actor.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsAuthQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = match params.token {
        Some(token) => verify_credential(&state, &token).await,
        None => Err(AuthError::Missing),
    };

    match verified {
        Ok(user_id) => {
            tracing::info!(user_id = %user_id, "WebSocket connection authenticated");
            ws.on_upgrade(move |socket| actor::run_connection(socket, state, user_id))
        }
        Err(err) => {
            let (close_code, reason) = match err {
                AuthError::Expired => (CLOSE_TOKEN_EXPIRED, "Token expired"),
                _ => (CLOSE_TOKEN_INVALID, "Token invalid"),
            };

            tracing::warn!(
                close_code = close_code,
                reason = reason,
                "WebSocket auth failed"
            );

            ws.on_upgrade(move |mut socket| async move {
                let close_frame = CloseFrame {
                    code: close_code,
                    reason: reason.into(),
                };
                let _ = socket.send(Message::Close(Some(close_frame))).await;
            })
        }
    }
}

/// The identity-verification step, run before any registry mutation: decode
/// the JWT, then reject revoked tokens. Store failures fail closed.
async fn verify_credential(state: &AppState, token: &str) -> Result<String, AuthError> {
    let user_id = jwt::verify(&state.jwt_secret, token)?;

    let store = state.store.clone();
    let hash = jwt::token_hash(token);
    let revoked = tokio::task::spawn_blocking(move || store.is_token_blacklisted(&hash))
        .await
        .map_err(|_| AuthError::Invalid)?
        .map_err(|_| AuthError::Invalid)?;

    if revoked {
        return Err(AuthError::Revoked);
    }
    Ok(user_id)
}
