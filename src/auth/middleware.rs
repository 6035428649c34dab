use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};

use crate::auth::jwt::{self, Claims};
use crate::state::AppState;

impl FromRequestParts<AppState> for Claims {
    type Rejection = StatusCode;

    /// Extract and validate the `Authorization: Bearer` token, rejecting
    /// revoked tokens against the store's blacklist.
    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let claims =
            jwt::decode_claims(&state.jwt_secret, token).map_err(|_| StatusCode::UNAUTHORIZED)?;

        let store = state.store.clone();
        let hash = jwt::token_hash(token);
        let revoked = tokio::task::spawn_blocking(move || store.is_token_blacklisted(&hash))
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if revoked {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(claims)
    }
}
