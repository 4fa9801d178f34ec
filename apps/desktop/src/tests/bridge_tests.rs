use super::*;
use client_core::{InMemoryBackend, NicknameStatus, ProfileStore, SurfaceConfig};

async fn surface(backend: &Arc<InMemoryBackend>) -> Arc<CommandSurface> {
    Arc::new(
        CommandSurface::new(backend.clone(), ProfileStore::ephemeral(), SurfaceConfig::default())
            .await
            .expect("surface"),
    )
}

async fn bridge_on(
    backend: &Arc<InMemoryBackend>,
) -> (Arc<Bridge>, mpsc::UnboundedReceiver<String>) {
    Bridge::new(surface(backend).await, Duration::ZERO)
}

async fn request(bridge: &Bridge, line: Value) -> Value {
    bridge
        .handle_line(&line.to_string())
        .await
        .expect("reply")
}

#[tokio::test]
async fn malformed_lines_are_validation_errors() {
    let backend = Arc::new(InMemoryBackend::new());
    let (bridge, _outgoing) = bridge_on(&backend).await;

    let reply = bridge.handle_line("{not json").await.expect("reply");
    assert_eq!(reply["id"], Value::Null);
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["category"], "validation");

    let reply = request(&bridge, json!({ "id": 7, "command": "drop_tables" })).await;
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["error"]["category"], "validation");

    let reply = request(&bridge, json!({ "id": 8, "command": "send_crypto", "args": {} })).await;
    assert_eq!(reply["error"]["kind"], "validation");

    assert!(bridge.handle_line("   ").await.is_none());
}

#[tokio::test]
async fn commands_reply_with_their_values() {
    let backend = Arc::new(InMemoryBackend::new());
    let (bridge, _outgoing) = bridge_on(&backend).await;

    let reply = request(&bridge, json!({ "id": 1, "command": "have_account" })).await;
    assert_eq!(reply, json!({ "id": 1, "ok": true, "value": false }));

    let reply = request(&bridge, json!({ "id": 2, "command": "get_nickname" })).await;
    assert_eq!(reply["ok"], false);
    assert_eq!(reply["error"]["kind"], "no_account");
    assert_eq!(reply["error"]["category"], "not_found");

    let reply = request(
        &bridge,
        json!({ "id": "reg", "command": "registration", "args": { "nickname": "alice" } }),
    )
    .await;
    assert_eq!(reply, json!({ "id": "reg", "ok": true, "value": null }));

    let reply = request(&bridge, json!({ "id": 3, "command": "get_nickname" })).await;
    assert_eq!(reply["value"], "alice");

    let reply = request(
        &bridge,
        json!({ "id": 4, "command": "registration", "args": { "nickname": "bob" } }),
    )
    .await;
    assert_eq!(reply["error"]["category"], "conflict");
}

#[tokio::test]
async fn check_nickname_reports_status() {
    let backend = Arc::new(InMemoryBackend::new());
    let (bridge, _outgoing) = bridge_on(&backend).await;
    request(
        &bridge,
        json!({ "command": "registration", "args": { "nickname": "alice" } }),
    )
    .await;

    let reply = request(
        &bridge,
        json!({ "id": 1, "command": "check_nickname", "args": { "nickname": "ALICE" } }),
    )
    .await;
    assert_eq!(reply["value"], json!({ "status": "is_taken" }));

    let reply = request(
        &bridge,
        json!({ "id": 2, "command": "check_nickname", "args": { "nickname": "zed" } }),
    )
    .await;
    assert_eq!(reply["value"], json!({ "status": "is_free" }));

    let reply = request(
        &bridge,
        json!({ "id": 3, "command": "check_nickname", "args": { "nickname": "a b" } }),
    )
    .await;
    assert_eq!(reply["value"]["status"], "invalid");
    assert!(reply["value"]["detail"].is_string());

    let reply = request(&bridge, json!({ "id": 4, "command": "check_nickname" })).await;
    assert_eq!(reply["error"]["category"], "validation");
}

#[tokio::test]
async fn registration_starts_event_forwarding() {
    let backend = Arc::new(InMemoryBackend::new());
    let (bridge, mut outgoing) = bridge_on(&backend).await;
    request(
        &bridge,
        json!({ "command": "registration", "args": { "nickname": "alice" } }),
    )
    .await;

    let bob = surface(&backend).await;
    bob.registration("bob").await.expect("registration");
    bob.send_crypto("alice").await.expect("request");

    let line = tokio::time::timeout(Duration::from_secs(5), outgoing.recv())
        .await
        .expect("event in time")
        .expect("event line");
    let event: Value = serde_json::from_str(&line).expect("json");
    assert_eq!(event["event"]["type"], "friend_request_received");
    assert_eq!(event["event"]["payload"]["from"], "bob");
    assert_eq!(event["event"]["payload"]["to"], "alice");
}

#[tokio::test]
async fn run_answers_every_request_before_exiting() {
    let backend = Arc::new(InMemoryBackend::new());
    let (bridge, outgoing) = bridge_on(&backend).await;

    let input = concat!(
        "{\"id\": 1, \"command\": \"get_version_app\"}\n",
        "\n",
        "{\"id\": 2, \"command\": \"fuzzy_search_command\", \"args\": {\"query\": \"get_nick\"}}\n",
    );
    let mut output = Vec::new();
    bridge
        .run(input.as_bytes(), &mut output, outgoing)
        .await
        .expect("run");

    let mut replies: Vec<Value> = String::from_utf8(output)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("json"))
        .collect();
    replies.sort_by_key(|reply| reply["id"].as_i64());
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0]["value"], env!("CARGO_PKG_VERSION"));
    assert_eq!(replies[1]["value"][0], "get_nickname");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_nickname_line_wins_under_parallel_scheduling() {
    let backend = Arc::new(InMemoryBackend::new());

    for round in 0..50 {
        let (bridge, outgoing) = bridge_on(&backend).await;
        let mut input = String::new();
        for id in 0..7 {
            let line = json!({ "id": id, "command": "check_nickname", "args": { "nickname": format!("name{round}x{id}") } });
            input.push_str(&format!("{line}\n"));
        }
        let last = json!({ "id": 7, "command": "check_nickname", "args": { "nickname": "a b" } });
        input.push_str(&format!("{last}\n"));

        let mut output = Vec::new();
        bridge
            .clone()
            .run(input.as_bytes(), &mut output, outgoing)
            .await
            .expect("run");

        assert!(
            matches!(bridge.checker.status(), NicknameStatus::Invalid(_)),
            "round {round}: {:?}",
            bridge.checker.status()
        );
        let replies: Vec<Value> = String::from_utf8(output)
            .expect("utf8")
            .lines()
            .map(|line| serde_json::from_str(line).expect("json"))
            .collect();
        assert_eq!(replies.len(), 8, "round {round}");
        let last_reply = replies
            .iter()
            .find(|reply| reply["id"] == 7)
            .expect("reply to the last line");
        assert_eq!(last_reply["value"]["status"], "invalid", "round {round}");
    }
}
