use super::*;
use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

fn credentials() -> Credentials {
    Credentials {
        nickname: Nickname::parse("alice").expect("nickname"),
        auth_key: "k e y".to_string(),
    }
}

async fn stub_server() -> String {
    let app = Router::new()
        .route(
            "/nicknames/:nickname",
            get(|Path(nickname): Path<String>| async move {
                Json(json!({ "nickname": nickname, "taken": nickname == "alice" }))
            }),
        )
        .route(
            "/register",
            post(|| async {
                (
                    StatusCode::CONFLICT,
                    Json(json!({ "code": "conflict", "message": "nickname 'alice' is already taken" })),
                )
            }),
        )
        .route(
            "/friends",
            post(|| async { (StatusCode::BAD_GATEWAY, "upstream is down") }),
        )
        .route(
            "/requests/incoming",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["credentials"]["nickname"], "alice");
                Json(json!(["bob", "carol"]))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[test]
fn rejects_non_http_server_urls() {
    let err = HttpBackend::new("ftp://chat.example", Duration::from_secs(1))
        .err()
        .expect("invalid scheme");
    assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
}

#[test]
fn websocket_url_carries_encoded_credentials() {
    let backend =
        HttpBackend::new("https://chat.example/", Duration::from_secs(1)).expect("backend");
    assert_eq!(backend.server_url(), "https://chat.example");
    let url = backend.ws_url(&credentials()).expect("url");
    assert_eq!(url.scheme(), "wss");
    assert_eq!(url.path(), "/ws");
    assert_eq!(url.query(), Some("nickname=alice&auth_key=k+e+y"));
}

#[tokio::test]
async fn decodes_successful_responses() {
    let backend = HttpBackend::new(stub_server().await, Duration::from_secs(5)).expect("backend");
    let alice = Nickname::parse("alice").expect("nickname");
    let zed = Nickname::parse("zed").expect("nickname");
    assert!(backend.nickname_is_taken(&alice).await.expect("taken"));
    assert!(!backend.nickname_is_taken(&zed).await.expect("free"));

    let incoming = backend
        .incoming_requests(&credentials())
        .await
        .expect("incoming");
    let names: Vec<_> = incoming.iter().map(Nickname::as_str).collect();
    assert_eq!(names, vec!["bob", "carol"]);
}

#[tokio::test]
async fn server_error_bodies_keep_their_category() {
    let backend = HttpBackend::new(stub_server().await, Duration::from_secs(5)).expect("backend");
    let alice = Nickname::parse("alice").expect("nickname");
    let err = backend.register(&alice).await.expect_err("conflict");
    assert_eq!(
        err,
        CommandError::Conflict("nickname 'alice' is already taken".into())
    );
}

#[tokio::test]
async fn non_api_failures_are_unavailable() {
    let backend = HttpBackend::new(stub_server().await, Duration::from_secs(5)).expect("backend");
    let err = backend.friends(&credentials()).await.expect_err("bad gateway");
    assert!(matches!(err, CommandError::Unavailable(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_server_is_unavailable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let backend = HttpBackend::new(format!("http://{addr}"), Duration::from_secs(5)).expect("backend");
    let err = backend
        .check_account(&credentials())
        .await
        .expect_err("connection refused");
    assert_eq!(err.category(), crate::error::ErrorCategory::Unavailable);
}
