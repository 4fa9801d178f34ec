use shared::domain::Nickname;
use storage::{AcceptOutcome, Storage};

#[tokio::test]
async fn request_accept_and_message_flow_acceptance() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!(
        "sqlite://{}",
        dir.path()
            .join("chat.db")
            .to_string_lossy()
            .replace('\\', "/")
    );

    let alice_nick = Nickname::parse("alice").expect("nickname");
    let bob_nick = Nickname::parse("Bob42").expect("nickname");

    {
        let storage = Storage::new(&database_url).await.expect("db");
        let alice = storage
            .create_user(&alice_nick, "alice-key")
            .await
            .expect("insert")
            .expect("alice");
        let bob = storage
            .create_user(&bob_nick, "bob-key")
            .await
            .expect("insert")
            .expect("bob");

        storage
            .insert_friend_request(alice, bob)
            .await
            .expect("request")
            .expect("new request");
        assert_eq!(
            storage.incoming_requests(bob).await.expect("incoming"),
            vec![alice_nick.clone()]
        );
        assert_eq!(
            storage
                .accept_friend_request(alice, bob)
                .await
                .expect("accept"),
            AcceptOutcome::Accepted
        );
        storage
            .insert_message(alice, bob, "first", None)
            .await
            .expect("message");
    }

    let reopened = Storage::new(&database_url).await.expect("reopen");
    let alice = reopened
        .find_user(&alice_nick)
        .await
        .expect("lookup")
        .expect("alice persisted");
    let bob = reopened
        .find_user(&Nickname::parse("bob42").expect("nickname"))
        .await
        .expect("lookup")
        .expect("bob persisted");
    assert_eq!(bob.nickname, bob_nick);
    assert!(reopened
        .are_friends(alice.user_id, bob.user_id)
        .await
        .expect("friends"));

    let history = reopened
        .list_conversation(alice.user_id, bob.user_id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender, alice_nick);
    assert_eq!(history[0].body.text, "first");
}
