//! Integration tests for the account flow: register validation, duplicate
//! handling, login, bearer-token auth on API routes, and logout revocation.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Start the server on a random port with the in-memory store.
async fn start_test_server() -> (String, SocketAddr) {
    let store: courier_server::store::SharedStore =
        Arc::new(courier_server::store::memory::MemoryStore::new());
    let hub = Arc::new(courier_server::realtime::RealtimeHub::new(
        Duration::from_secs(5),
    ));
    let state = courier_server::state::AppState {
        store,
        jwt_secret: vec![42u8; 32],
        hub,
    };

    let app = courier_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    (format!("http://{}", addr), addr)
}

#[tokio::test]
async fn test_health_is_public() {
    let (base_url, _addr) = start_test_server().await;
    let resp = reqwest::get(format!("{base_url}/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn test_register_validates_credentials() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    // Username too short.
    let resp = client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "ab", "password": "long-enough"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    // Password too short.
    let resp = client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "alice", "password": "short"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_duplicate_username_conflicts_case_insensitively() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "Alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{base_url}/api/auth/login"))
        .json(&json!({"username": "alice", "password": "wrong-horse1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{base_url}/api/auth/login"))
        .json(&json!({"username": "nobody", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_login_issues_working_token() {
    let (base_url, _addr) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{base_url}/api/auth/login"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap();
    assert_eq!(body["user"]["username"], "alice");

    // Token works on an authenticated route.
    let resp = client
        .get(format!("{base_url}/api/users"))
        .bearer_auth(token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // No token (or garbage) does not.
    let resp = client
        .get(format!("{base_url}/api/users"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(format!("{base_url}/api/users"))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_logout_revokes_the_token() {
    let (base_url, addr) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    let resp = client
        .post(format!("{base_url}/api/auth/login"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let token = body["token"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base_url}/api/auth/logout"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // The revoked token is dead for HTTP...
    let resp = client
        .get(format!("{base_url}/api/users"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    // ...and for the WebSocket upgrade.
    use futures_util::StreamExt;
    let ws_url = format!("ws://{}/ws?token={}", addr, token);
    let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("upgrade still happens");
    let (_write, mut read) = ws_stream.split();
    let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
        .await
        .expect("Expected close within timeout");
    if let Some(Ok(msg)) = msg {
        assert!(msg.is_close(), "Expected close for revoked token, got {msg:?}");
    }
}

#[tokio::test]
async fn test_user_listing_carries_presence() {
    let (base_url, addr) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    let resp = client
        .post(format!("{base_url}/api/auth/register"))
        .json(&json!({"username": "bob", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    let bob: Value = resp.json().await.unwrap();
    let bob_id = bob["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base_url}/api/auth/login"))
        .json(&json!({"username": "alice", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let alice_token = body["token"].as_str().unwrap().to_string();

    // Bob is offline: listed with online=false.
    let resp = client
        .get(format!("{base_url}/api/users"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    let users: Value = resp.json().await.unwrap();
    assert_eq!(users[0]["username"], "bob");
    assert_eq!(users[0]["online"], false);

    // Bob connects over WS: the flag flips.
    let resp = client
        .post(format!("{base_url}/api/auth/login"))
        .json(&json!({"username": "bob", "password": "correct-horse"}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let bob_token = body["token"].as_str().unwrap().to_string();

    let ws_url = format!("ws://{}/ws?token={}", addr, bob_token);
    let (_ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("ws connect");
    tokio::time::sleep(Duration::from_millis(200)).await;

    let resp = client
        .get(format!("{base_url}/api/users/{bob_id}"))
        .bearer_auth(&alice_token)
        .send()
        .await
        .unwrap();
    let user: Value = resp.json().await.unwrap();
    assert_eq!(user["online"], true);
}
