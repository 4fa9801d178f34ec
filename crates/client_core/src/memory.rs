use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use shared::{
    domain::{validate_message_text, Credentials, Message, MessageBody, MessageId, Nickname},
    protocol::ServerEvent,
};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

use crate::{
    backend::{ChatBackend, EventStream},
    error::CommandError,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
struct Account {
    nickname: Nickname,
    auth_key: String,
}

struct Conversation {
    low: String,
    high: String,
    message: Message,
}

#[derive(Default)]
struct State {
    /// Keyed by the case-folded nickname.
    accounts: HashMap<String, Account>,
    /// `(from, to)` keys in request order.
    requests: Vec<(String, String)>,
    /// `(low, high)` keys in creation order.
    friendships: Vec<(String, String)>,
    messages: Vec<Conversation>,
    next_message_id: i64,
    subscribers: Vec<(String, mpsc::Sender<ServerEvent>)>,
}

impl State {
    fn authenticate(&self, credentials: &Credentials) -> Result<Account, CommandError> {
        match self.accounts.get(&credentials.nickname.key()) {
            Some(account) if account.auth_key == credentials.auth_key => Ok(account.clone()),
            _ => Err(CommandError::Unauthorized(
                "unknown account or invalid auth key".into(),
            )),
        }
    }

    fn peer(&self, nickname: &Nickname) -> Result<Account, CommandError> {
        self.accounts
            .get(&nickname.key())
            .cloned()
            .ok_or_else(|| CommandError::NotFound(format!("user '{nickname}' not found")))
    }

    fn are_friends(&self, a: &str, b: &str) -> bool {
        let pair = ordered(a, b);
        self.friendships
            .iter()
            .any(|(low, high)| (low.as_str(), high.as_str()) == pair)
    }

    fn has_request(&self, from: &str, to: &str) -> bool {
        self.requests.iter().any(|(f, t)| f == from && t == to)
    }

    fn remove_request(&mut self, from: &str, to: &str) -> bool {
        let before = self.requests.len();
        self.requests.retain(|(f, t)| !(f == from && t == to));
        before != self.requests.len()
    }

    fn display(&self, key: &str) -> Option<Nickname> {
        self.accounts.get(key).map(|a| a.nickname.clone())
    }

    fn publish(&mut self, event: ServerEvent) {
        self.subscribers.retain(|(key, tx)| {
            if tx.is_closed() {
                return false;
            }
            if let Some(account) = self.accounts.get(key) {
                if event.concerns(&account.nickname) {
                    // A full subscriber misses the event rather than stalling the backend.
                    let _ = tx.try_send(event.clone());
                }
            }
            true
        });
    }
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Self-contained backend with the same rules as the reference server.
///
/// Used by tests and by the desktop host's offline mode. Supports fault
/// injection through [`InMemoryBackend::fail_next_with`] and artificial
/// latency.
#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    fail_next: Mutex<Option<CommandError>>,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The next backend call fails with `error` instead of running.
    pub async fn fail_next_with(&self, error: CommandError) {
        *self.fail_next.lock().await = Some(error);
    }

    /// Number of backend calls made so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<(), CommandError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        match self.fail_next.lock().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatBackend for InMemoryBackend {
    async fn nickname_is_taken(&self, nickname: &Nickname) -> Result<bool, CommandError> {
        self.enter().await?;
        Ok(self.state.lock().await.accounts.contains_key(&nickname.key()))
    }

    async fn register(&self, nickname: &Nickname) -> Result<Credentials, CommandError> {
        self.enter().await?;
        let mut state = self.state.lock().await;
        let key = nickname.key();
        if state.accounts.contains_key(&key) {
            return Err(CommandError::Conflict(format!(
                "nickname '{nickname}' is already taken"
            )));
        }
        let account = Account {
            nickname: nickname.clone(),
            auth_key: Uuid::new_v4().simple().to_string(),
        };
        state.accounts.insert(key, account.clone());
        debug!(%nickname, "in-memory account registered");
        Ok(Credentials {
            nickname: account.nickname,
            auth_key: account.auth_key,
        })
    }

    async fn check_account(&self, credentials: &Credentials) -> Result<bool, CommandError> {
        self.enter().await?;
        Ok(self.state.lock().await.authenticate(credentials).is_ok())
    }

    async fn send_friend_request(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
    ) -> Result<(), CommandError> {
        self.enter().await?;
        let mut state = self.state.lock().await;
        let me = state.authenticate(credentials)?;
        if me.nickname.same_account(peer) {
            return Err(CommandError::Validation(
                "cannot send a friend request to yourself".into(),
            ));
        }
        let target = state.peer(peer)?;
        let (me_key, target_key) = (me.nickname.key(), target.nickname.key());
        if state.are_friends(&me_key, &target_key) {
            return Err(CommandError::Conflict(format!(
                "'{}' is already your friend",
                target.nickname
            )));
        }
        if state.has_request(&target_key, &me_key) {
            return Err(CommandError::Conflict(format!(
                "'{}' already sent you a request",
                target.nickname
            )));
        }
        if state.has_request(&me_key, &target_key) {
            return Err(CommandError::Conflict(format!(
                "a request to '{}' is already pending",
                target.nickname
            )));
        }
        state.requests.push((me_key, target_key));
        state.publish(ServerEvent::FriendRequestReceived {
            from: me.nickname,
            to: target.nickname,
        });
        Ok(())
    }

    async fn incoming_requests(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Nickname>, CommandError> {
        self.enter().await?;
        let state = self.state.lock().await;
        let me = state.authenticate(credentials)?.nickname.key();
        Ok(state
            .requests
            .iter()
            .filter(|(_, to)| *to == me)
            .filter_map(|(from, _)| state.display(from))
            .collect())
    }

    async fn outgoing_requests(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Nickname>, CommandError> {
        self.enter().await?;
        let state = self.state.lock().await;
        let me = state.authenticate(credentials)?.nickname.key();
        Ok(state
            .requests
            .iter()
            .filter(|(from, _)| *from == me)
            .filter_map(|(_, to)| state.display(to))
            .collect())
    }

    async fn accept_friend_request(
        &self,
        credentials: &Credentials,
        requester: &Nickname,
    ) -> Result<(), CommandError> {
        self.enter().await?;
        let mut state = self.state.lock().await;
        let me = state.authenticate(credentials)?;
        let requester = state.peer(requester)?;
        let (me_key, requester_key) = (me.nickname.key(), requester.nickname.key());
        if state.are_friends(&me_key, &requester_key) {
            return Ok(());
        }
        if !state.remove_request(&requester_key, &me_key) {
            return Err(CommandError::NotFound(format!(
                "no pending request from '{}'",
                requester.nickname
            )));
        }
        state.remove_request(&me_key, &requester_key);
        let (low, high) = ordered(&me_key, &requester_key);
        let pair = (low.to_string(), high.to_string());
        state.friendships.push(pair);
        state.publish(ServerEvent::FriendRequestAccepted {
            requester: requester.nickname,
            accepter: me.nickname,
        });
        Ok(())
    }

    async fn decline_friend_request(
        &self,
        credentials: &Credentials,
        requester: &Nickname,
    ) -> Result<(), CommandError> {
        self.enter().await?;
        let mut state = self.state.lock().await;
        let me = state.authenticate(credentials)?;
        let requester = state.peer(requester)?;
        if !state.remove_request(&requester.nickname.key(), &me.nickname.key()) {
            return Err(CommandError::NotFound(format!(
                "no pending request from '{}'",
                requester.nickname
            )));
        }
        state.publish(ServerEvent::FriendRequestDeclined {
            requester: requester.nickname,
            decliner: me.nickname,
        });
        Ok(())
    }

    async fn friends(&self, credentials: &Credentials) -> Result<Vec<Nickname>, CommandError> {
        self.enter().await?;
        let state = self.state.lock().await;
        let me = state.authenticate(credentials)?.nickname.key();
        Ok(state
            .friendships
            .iter()
            .filter_map(|(low, high)| {
                if *low == me {
                    state.display(high)
                } else if *high == me {
                    state.display(low)
                } else {
                    None
                }
            })
            .collect())
    }

    async fn send_message(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
        body: &MessageBody,
    ) -> Result<Message, CommandError> {
        self.enter().await?;
        let mut state = self.state.lock().await;
        let me = state.authenticate(credentials)?;
        validate_message_text(&body.text).map_err(|e| CommandError::Validation(e.to_string()))?;
        let target = state.peer(peer)?;
        let (me_key, target_key) = (me.nickname.key(), target.nickname.key());
        if !state.are_friends(&me_key, &target_key) {
            return Err(CommandError::Forbidden(format!(
                "'{}' is not your friend",
                target.nickname
            )));
        }
        let (low, high) = ordered(&me_key, &target_key);
        let (low, high) = (low.to_string(), high.to_string());
        if let Some(reply) = body.reply {
            let in_conversation = state
                .messages
                .iter()
                .any(|c| c.message.id == reply && c.low == low && c.high == high);
            if !in_conversation {
                return Err(CommandError::NotFound(format!(
                    "message {} is not part of this conversation",
                    reply.0
                )));
            }
        }

        state.next_message_id += 1;
        let message = Message {
            id: MessageId(state.next_message_id),
            sender: me.nickname,
            body: body.clone(),
            sent_at: Utc::now(),
        };
        state.messages.push(Conversation {
            low,
            high,
            message: message.clone(),
        });
        state.publish(ServerEvent::MessageReceived {
            recipient: target.nickname,
            message: message.clone(),
        });
        Ok(message)
    }

    async fn messages(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
    ) -> Result<Vec<Message>, CommandError> {
        self.enter().await?;
        let state = self.state.lock().await;
        let me = state.authenticate(credentials)?;
        let target = state.peer(peer)?;
        let (me_key, target_key) = (me.nickname.key(), target.nickname.key());
        let (low, high) = ordered(&me_key, &target_key);
        Ok(state
            .messages
            .iter()
            .filter(|c| c.low == low && c.high == high)
            .map(|c| c.message.clone())
            .collect())
    }

    async fn subscribe(&self, credentials: &Credentials) -> Result<EventStream, CommandError> {
        self.enter().await?;
        let mut state = self.state.lock().await;
        let me = state.authenticate(credentials)?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        state.subscribers.push((me.nickname.key(), tx));
        Ok(rx)
    }
}
