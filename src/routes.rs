use axum::Router;
use std::sync::Arc;
use tower_governor::key_extractor::PeerIpKeyExtractor;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};

use crate::auth::accounts;
use crate::chat::{chats, messages};
use crate::state::AppState;
use crate::users;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    // Rate limiting: 5 requests per minute per IP on credential endpoints.
    // Uses PeerIpKeyExtractor which reads from ConnectInfo<SocketAddr>.
    let governor_config = Arc::new(
        GovernorConfigBuilder::default()
            .key_extractor(PeerIpKeyExtractor)
            .per_second(12) // 1 token every 12 seconds = 5 per minute
            .burst_size(5)
            .finish()
            .expect("Failed to build governor config"),
    );
    let governor_limiter = governor_config.limiter().clone();

    // Background task to clean up rate limiter state.
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    // Credential endpoints with rate limiting
    let auth_routes = Router::new()
        .route(
            "/api/auth/register",
            axum::routing::post(accounts::register),
        )
        .route("/api/auth/login", axum::routing::post(accounts::login))
        .layer(GovernorLayer {
            config: governor_config,
        });

    // Authenticated routes (JWT required — Claims extractor validates token)
    let authenticated_routes = Router::new()
        .route("/api/auth/logout", axum::routing::post(accounts::logout))
        .route("/api/users", axum::routing::get(users::list_users))
        .route("/api/users/search", axum::routing::get(users::search_users))
        .route("/api/users/{id}", axum::routing::get(users::get_user))
        .route("/api/chats", axum::routing::get(chats::list_chats))
        .route(
            "/api/chats/private",
            axum::routing::post(chats::create_private_chat),
        )
        .route(
            "/api/chats/group",
            axum::routing::post(chats::create_group_chat),
        )
        .route("/api/messages", axum::routing::post(messages::send_message))
        .route(
            "/api/messages/read",
            axum::routing::post(messages::mark_read),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::get(messages::get_messages)
                .put(messages::edit_message)
                .delete(messages::delete_message),
        );

    // WebSocket endpoint (auth via query param, not JWT header)
    let ws_routes = Router::new().route("/ws", axum::routing::get(ws_handler::ws_upgrade));

    // Health check
    let health = Router::new().route("/health", axum::routing::get(health_check));

    Router::new()
        .merge(auth_routes)
        .merge(authenticated_routes)
        .merge(ws_routes)
        .merge(health)
        .with_state(state)
}

/// Basic health check endpoint
async fn health_check() -> &'static str {
    "ok"
}
