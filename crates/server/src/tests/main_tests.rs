use super::*;
use axum::{body, body::Body, http::Request};
use futures::StreamExt;
use serde_json::{json, Value};
use tower::ServiceExt;

async fn test_app() -> (Router, Arc<AppState>) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let (events, _) = broadcast::channel(32);
    let state = Arc::new(AppState {
        api: ApiContext { storage },
        events,
    });
    (build_router(state.clone()), state)
}

async fn post_json(app: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    let request = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json")
    };
    (status, value)
}

async fn register(app: &Router, nickname: &str) -> Value {
    let (status, body) = post_json(app, "/register", json!({ "nickname": nickname })).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["credentials"].clone()
}

async fn befriend(app: &Router, a: &Value, b: &Value) {
    let (status, _) = post_json(
        app,
        "/requests",
        json!({ "credentials": a, "peer": b["nickname"] }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = post_json(
        app,
        "/requests/accept",
        json!({ "credentials": b, "peer": a["nickname"] }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _state) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn nickname_status_route_reflects_registration() {
    let (app, _state) = test_app().await;
    register(&app, "Alice").await;

    let request = Request::get("/nicknames/alice")
        .body(Body::empty())
        .expect("request");
    let response = app.clone().oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let dto: NicknameStatusResponse = serde_json::from_slice(&bytes).expect("json");
    assert!(dto.taken);

    let request = Request::get("/nicknames/bad!name")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn register_route_status_codes() {
    let (app, _state) = test_app().await;
    register(&app, "bob").await;

    let (status, body) = post_json(&app, "/register", json!({ "nickname": "BOB" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "conflict");

    let (status, body) = post_json(&app, "/register", json!({ "nickname": "two words" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn authenticated_routes_reject_bad_keys() {
    let (app, _state) = test_app().await;
    let alice = register(&app, "alice").await;
    let forged = json!({ "nickname": alice["nickname"], "auth_key": "forged" });

    let (status, _) = post_json(&app, "/friends", json!({ "credentials": forged })).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = post_json(&app, "/check", json!({ "credentials": forged })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    let (_, body) = post_json(&app, "/check", json!({ "credentials": alice })).await;
    assert_eq!(body["valid"], true);
}

#[tokio::test]
async fn friend_request_routes_follow_the_contract() {
    let (app, _state) = test_app().await;
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;

    let (status, _) = post_json(
        &app,
        "/requests",
        json!({ "credentials": alice, "peer": "ghost" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = post_json(&app, "/requests", json!({ "credentials": alice, "peer": "bob" })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, outgoing) = post_json(&app, "/requests/outgoing", json!({ "credentials": alice })).await;
    assert_eq!(outgoing, json!(["bob"]));
    let (_, incoming) = post_json(&app, "/requests/incoming", json!({ "credentials": bob })).await;
    assert_eq!(incoming, json!(["alice"]));

    let (status, _) = post_json(
        &app,
        "/requests/decline",
        json!({ "credentials": bob, "peer": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = post_json(
        &app,
        "/requests/accept",
        json!({ "credentials": bob, "peer": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    befriend(&app, &alice, &bob).await;
    let (_, friends) = post_json(&app, "/friends", json!({ "credentials": bob })).await;
    assert_eq!(friends, json!(["alice"]));
}

#[tokio::test]
async fn message_routes_enforce_friendship() {
    let (app, _state) = test_app().await;
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;

    let (status, body) = post_json(
        &app,
        "/messages",
        json!({ "credentials": alice, "peer": "bob", "text": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    befriend(&app, &alice, &bob).await;
    let (status, first) = post_json(
        &app,
        "/messages",
        json!({ "credentials": alice, "peer": "bob", "text": "hi" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post_json(
        &app,
        "/messages",
        json!({ "credentials": bob, "peer": "alice", "text": "hello", "reply": first["id"] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, history) = post_json(
        &app,
        "/messages/list",
        json!({ "credentials": bob, "peer": "alice" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let history: Vec<Message> = serde_json::from_value(history).expect("messages");
    assert_eq!(history.len(), 2);
    assert!(history[0].id < history[1].id);
    assert_eq!(history[1].body.reply, Some(history[0].id));
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let (app, _state) = test_app().await;
    let (status, body) = post_json(&app, "/friends", json!({ "unexpected": true })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
}

#[tokio::test]
async fn websocket_forwards_only_events_for_its_account() {
    let (app, _state) = test_app().await;
    let alice = register(&app, "alice").await;
    let bob = register(&app, "bob").await;
    let carol = register(&app, "carol").await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    let server_app = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, server_app).await.expect("serve");
    });

    let url = format!(
        "ws://{addr}/ws?nickname=bob&auth_key={}",
        bob["auth_key"].as_str().expect("key")
    );
    let (mut bob_ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("bob websocket");

    // Give the socket task a moment to subscribe before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (status, _) = post_json(&app, "/requests", json!({ "credentials": alice, "peer": "carol" })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = post_json(&app, "/requests", json!({ "credentials": carol, "peer": "bob" })).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let frame = tokio::time::timeout(std::time::Duration::from_secs(5), bob_ws.next())
        .await
        .expect("event in time")
        .expect("frame")
        .expect("ok frame");
    let text = frame.into_text().expect("text frame");
    let event: ServerEvent = serde_json::from_str(&text).expect("event");
    match event {
        ServerEvent::FriendRequestReceived { from, to } => {
            assert_eq!(from.as_str(), "carol");
            assert_eq!(to.as_str(), "bob");
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn websocket_rejects_bad_credentials() {
    let (app, _state) = test_app().await;
    register(&app, "bob").await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let url = format!("ws://{addr}/ws?nickname=bob&auth_key=wrong");
    match tokio_tungstenite::connect_async(&url).await {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 401);
        }
        Err(other) => panic!("unexpected error {other}"),
        Ok(_) => panic!("handshake should be refused"),
    }
}
