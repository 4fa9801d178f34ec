use shared::{
    domain::{validate_message_text, Credentials, Message, MessageBody, MessageId, Nickname},
    error::{ApiError, ErrorCode},
    protocol::ServerEvent,
};
use storage::{AcceptOutcome, Storage, StoredUser};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn nickname_is_taken(ctx: &ApiContext, nickname: &Nickname) -> Result<bool, ApiError> {
    ctx.storage
        .nickname_exists(nickname)
        .await
        .map_err(internal)
}

/// Creates the account and issues its auth key.
///
/// The insert is the uniqueness check, so two racing registrations of the
/// same nickname resolve to exactly one success and one conflict.
pub async fn register(ctx: &ApiContext, nickname: &Nickname) -> Result<Credentials, ApiError> {
    let auth_key = Uuid::new_v4().simple().to_string();
    let created = ctx
        .storage
        .create_user(nickname, &auth_key)
        .await
        .map_err(internal)?;
    match created {
        Some(user_id) => {
            info!(nickname = %nickname, user_id = user_id.0, "account registered");
            Ok(Credentials {
                nickname: nickname.clone(),
                auth_key,
            })
        }
        None => Err(ApiError::conflict(format!(
            "nickname '{nickname}' is already taken"
        ))),
    }
}

pub async fn authenticate(ctx: &ApiContext, credentials: &Credentials) -> Result<StoredUser, ApiError> {
    let user = ctx
        .storage
        .find_user(&credentials.nickname)
        .await
        .map_err(internal)?;
    match user {
        Some(user) if user.auth_key == credentials.auth_key => Ok(user),
        _ => Err(ApiError::new(
            ErrorCode::Unauthorized,
            "unknown account or invalid auth key",
        )),
    }
}

/// Whether the credentials still identify a live account.
pub async fn check_account(ctx: &ApiContext, credentials: &Credentials) -> Result<bool, ApiError> {
    match authenticate(ctx, credentials).await {
        Ok(_) => Ok(true),
        Err(err) if err.code == ErrorCode::Unauthorized => Ok(false),
        Err(err) => Err(err),
    }
}

pub async fn send_friend_request(
    ctx: &ApiContext,
    credentials: &Credentials,
    peer: &Nickname,
) -> Result<ServerEvent, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    if me.nickname.same_account(peer) {
        return Err(ApiError::validation("cannot send a friend request to yourself"));
    }
    let target = find_peer(ctx, peer).await?;

    if ctx
        .storage
        .are_friends(me.user_id, target.user_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::conflict(format!(
            "'{}' is already your friend",
            target.nickname
        )));
    }
    if ctx
        .storage
        .has_pending_request(target.user_id, me.user_id)
        .await
        .map_err(internal)?
    {
        return Err(ApiError::conflict(format!(
            "'{}' already sent you a request",
            target.nickname
        )));
    }

    let inserted = ctx
        .storage
        .insert_friend_request(me.user_id, target.user_id)
        .await
        .map_err(internal)?;
    if inserted.is_none() {
        return Err(ApiError::conflict(format!(
            "a request to '{}' is already pending",
            target.nickname
        )));
    }

    debug!(from = %me.nickname, to = %target.nickname, "friend request stored");
    Ok(ServerEvent::FriendRequestReceived {
        from: me.nickname,
        to: target.nickname,
    })
}

pub async fn incoming_requests(ctx: &ApiContext, credentials: &Credentials) -> Result<Vec<Nickname>, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    ctx.storage
        .incoming_requests(me.user_id)
        .await
        .map_err(internal)
}

pub async fn outgoing_requests(ctx: &ApiContext, credentials: &Credentials) -> Result<Vec<Nickname>, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    ctx.storage
        .outgoing_requests(me.user_id)
        .await
        .map_err(internal)
}

/// Accepts `requester`'s pending request. Returns `None` when the two
/// accounts are already friends, in which case nothing changes.
pub async fn accept_friend_request(
    ctx: &ApiContext,
    credentials: &Credentials,
    requester: &Nickname,
) -> Result<Option<ServerEvent>, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    let requester = find_peer(ctx, requester).await?;
    let outcome = ctx
        .storage
        .accept_friend_request(requester.user_id, me.user_id)
        .await
        .map_err(internal)?;
    match outcome {
        AcceptOutcome::Accepted => {
            info!(requester = %requester.nickname, accepter = %me.nickname, "friendship created");
            Ok(Some(ServerEvent::FriendRequestAccepted {
                requester: requester.nickname,
                accepter: me.nickname,
            }))
        }
        AcceptOutcome::AlreadyFriends => Ok(None),
        AcceptOutcome::NoPending => Err(ApiError::not_found(format!(
            "no pending request from '{}'",
            requester.nickname
        ))),
    }
}

pub async fn decline_friend_request(
    ctx: &ApiContext,
    credentials: &Credentials,
    requester: &Nickname,
) -> Result<ServerEvent, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    let requester = find_peer(ctx, requester).await?;
    let removed = ctx
        .storage
        .delete_friend_request(requester.user_id, me.user_id)
        .await
        .map_err(internal)?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "no pending request from '{}'",
            requester.nickname
        )));
    }
    Ok(ServerEvent::FriendRequestDeclined {
        requester: requester.nickname,
        decliner: me.nickname,
    })
}

pub async fn friends(ctx: &ApiContext, credentials: &Credentials) -> Result<Vec<Nickname>, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    ctx.storage.list_friends(me.user_id).await.map_err(internal)
}

pub async fn send_message(
    ctx: &ApiContext,
    credentials: &Credentials,
    peer: &Nickname,
    text: &str,
    reply: Option<MessageId>,
) -> Result<(Message, ServerEvent), ApiError> {
    let me = authenticate(ctx, credentials).await?;
    validate_message_text(text).map_err(|e| ApiError::validation(e.to_string()))?;
    let target = find_peer(ctx, peer).await?;
    ensure_friends(ctx, &me, &target).await?;

    if let Some(reply_id) = reply {
        let in_conversation = ctx
            .storage
            .message_in_conversation(reply_id, me.user_id, target.user_id)
            .await
            .map_err(internal)?;
        if !in_conversation {
            return Err(ApiError::not_found(format!(
                "message {} is not part of this conversation",
                reply_id.0
            )));
        }
    }

    let (id, sent_at) = ctx
        .storage
        .insert_message(me.user_id, target.user_id, text, reply)
        .await
        .map_err(internal)?;
    let message = Message {
        id,
        sender: me.nickname,
        body: MessageBody {
            text: text.to_string(),
            reply,
        },
        sent_at,
    };
    let event = ServerEvent::MessageReceived {
        recipient: target.nickname,
        message: message.clone(),
    };
    Ok((message, event))
}

/// Conversation with `peer`, oldest first.
pub async fn list_messages(
    ctx: &ApiContext,
    credentials: &Credentials,
    peer: &Nickname,
) -> Result<Vec<Message>, ApiError> {
    let me = authenticate(ctx, credentials).await?;
    let target = find_peer(ctx, peer).await?;
    ctx.storage
        .list_conversation(me.user_id, target.user_id)
        .await
        .map_err(internal)
}

async fn find_peer(ctx: &ApiContext, nickname: &Nickname) -> Result<StoredUser, ApiError> {
    ctx.storage
        .find_user(nickname)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::not_found(format!("user '{nickname}' not found")))
}

async fn ensure_friends(ctx: &ApiContext, me: &StoredUser, peer: &StoredUser) -> Result<(), ApiError> {
    let friends = ctx
        .storage
        .are_friends(me.user_id, peer.user_id)
        .await
        .map_err(internal)?;
    if !friends {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            format!("'{}' is not your friend", peer.nickname),
        ));
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, format!("{err:#}"))
}
