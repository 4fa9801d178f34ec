use async_trait::async_trait;
use shared::{
    domain::{Credentials, Message, MessageBody, Nickname},
    protocol::ServerEvent,
};
use tokio::sync::mpsc;

use crate::error::CommandError;

pub type EventStream = mpsc::Receiver<ServerEvent>;

/// Everything the command surface needs from the service that owns the
/// durable state. Authenticated calls carry the local account's credentials.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn nickname_is_taken(&self, nickname: &Nickname) -> Result<bool, CommandError>;

    async fn register(&self, nickname: &Nickname) -> Result<Credentials, CommandError>;

    async fn check_account(&self, credentials: &Credentials) -> Result<bool, CommandError>;

    async fn send_friend_request(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
    ) -> Result<(), CommandError>;

    /// Senders of requests awaiting our answer, oldest first.
    async fn incoming_requests(&self, credentials: &Credentials)
        -> Result<Vec<Nickname>, CommandError>;

    async fn outgoing_requests(&self, credentials: &Credentials)
        -> Result<Vec<Nickname>, CommandError>;

    /// Succeeds without changes when the two accounts are already friends.
    async fn accept_friend_request(
        &self,
        credentials: &Credentials,
        requester: &Nickname,
    ) -> Result<(), CommandError>;

    async fn decline_friend_request(
        &self,
        credentials: &Credentials,
        requester: &Nickname,
    ) -> Result<(), CommandError>;

    async fn friends(&self, credentials: &Credentials) -> Result<Vec<Nickname>, CommandError>;

    async fn send_message(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
        body: &MessageBody,
    ) -> Result<Message, CommandError>;

    /// Conversation with `peer`, oldest first.
    async fn messages(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
    ) -> Result<Vec<Message>, CommandError>;

    /// Events concerning the authenticated account, until the stream is dropped.
    async fn subscribe(&self, credentials: &Credentials) -> Result<EventStream, CommandError>;
}
