use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    domain::{Credentials, Message, MessageBody, Nickname},
    error::ApiError,
    protocol::{
        AuthenticatedRequest, CheckResponse, NicknameStatusResponse, PeerRequest, RegisterRequest,
        RegisterResponse, SendMessageRequest, ServerEvent,
    },
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, warn};
use url::Url;

use crate::{
    backend::{ChatBackend, EventStream},
    error::CommandError,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// JSON-over-HTTP client of the chat server, plus its event websocket.
#[derive(Clone)]
pub struct HttpBackend {
    http: Client,
    server_url: String,
}

impl HttpBackend {
    pub fn new(server_url: impl Into<String>, request_timeout: Duration) -> Result<Self, CommandError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        if !(server_url.starts_with("http://") || server_url.starts_with("https://")) {
            return Err(CommandError::Validation(format!(
                "server url '{server_url}' must start with http:// or https://"
            )));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| CommandError::Unavailable(format!("failed to build http client: {e}")))?;
        Ok(Self { http, server_url })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    fn ws_url(&self, credentials: &Credentials) -> Result<Url, CommandError> {
        let ws_base = if self.server_url.starts_with("https://") {
            self.server_url.replacen("https://", "wss://", 1)
        } else {
            self.server_url.replacen("http://", "ws://", 1)
        };
        let mut url = Url::parse(&format!("{ws_base}/ws"))
            .map_err(|e| CommandError::Validation(format!("invalid server url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("nickname", credentials.nickname.as_str())
            .append_pair("auth_key", &credentials.auth_key);
        Ok(url)
    }

    async fn post_json<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, CommandError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.server_url))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        decode(check_status(response).await?).await
    }

    async fn post_unit<Req>(&self, path: &str, body: &Req) -> Result<(), CommandError>
    where
        Req: Serialize + Sync,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.server_url))
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await?;
        Ok(())
    }
}

fn transport_error(err: reqwest::Error) -> CommandError {
    CommandError::Unavailable(err.to_string())
}

/// Turns a non-success response into the server's `ApiError`, falling back
/// to the bare status when the body is not one.
async fn check_status(response: Response) -> Result<Response, CommandError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let bytes = response.bytes().await.map_err(transport_error)?;
    match serde_json::from_slice::<ApiError>(&bytes) {
        Ok(api_error) => Err(api_error.into()),
        Err(_) => Err(CommandError::Unavailable(format!(
            "server answered {status}"
        ))),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, CommandError> {
    response
        .json::<T>()
        .await
        .map_err(|e| CommandError::Unavailable(format!("malformed server response: {e}")))
}

fn peer_request(credentials: &Credentials, peer: &Nickname) -> PeerRequest {
    PeerRequest {
        credentials: credentials.clone(),
        peer: peer.clone(),
    }
}

fn authenticated(credentials: &Credentials) -> AuthenticatedRequest {
    AuthenticatedRequest {
        credentials: credentials.clone(),
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn nickname_is_taken(&self, nickname: &Nickname) -> Result<bool, CommandError> {
        let response = self
            .http
            .get(format!("{}/nicknames/{}", self.server_url, nickname.as_str()))
            .send()
            .await
            .map_err(transport_error)?;
        let body: NicknameStatusResponse = decode(check_status(response).await?).await?;
        Ok(body.taken)
    }

    async fn register(&self, nickname: &Nickname) -> Result<Credentials, CommandError> {
        let body: RegisterResponse = self
            .post_json(
                "/register",
                &RegisterRequest {
                    nickname: nickname.clone(),
                },
            )
            .await?;
        Ok(body.credentials)
    }

    async fn check_account(&self, credentials: &Credentials) -> Result<bool, CommandError> {
        let body: CheckResponse = self
            .post_json("/check", &authenticated(credentials))
            .await?;
        Ok(body.valid)
    }

    async fn send_friend_request(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
    ) -> Result<(), CommandError> {
        self.post_unit("/requests", &peer_request(credentials, peer))
            .await
    }

    async fn incoming_requests(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Nickname>, CommandError> {
        self.post_json("/requests/incoming", &authenticated(credentials))
            .await
    }

    async fn outgoing_requests(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Nickname>, CommandError> {
        self.post_json("/requests/outgoing", &authenticated(credentials))
            .await
    }

    async fn accept_friend_request(
        &self,
        credentials: &Credentials,
        requester: &Nickname,
    ) -> Result<(), CommandError> {
        self.post_unit("/requests/accept", &peer_request(credentials, requester))
            .await
    }

    async fn decline_friend_request(
        &self,
        credentials: &Credentials,
        requester: &Nickname,
    ) -> Result<(), CommandError> {
        self.post_unit("/requests/decline", &peer_request(credentials, requester))
            .await
    }

    async fn friends(&self, credentials: &Credentials) -> Result<Vec<Nickname>, CommandError> {
        self.post_json("/friends", &authenticated(credentials)).await
    }

    async fn send_message(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
        body: &MessageBody,
    ) -> Result<Message, CommandError> {
        self.post_json(
            "/messages",
            &SendMessageRequest {
                credentials: credentials.clone(),
                peer: peer.clone(),
                text: body.text.clone(),
                reply: body.reply,
            },
        )
        .await
    }

    async fn messages(
        &self,
        credentials: &Credentials,
        peer: &Nickname,
    ) -> Result<Vec<Message>, CommandError> {
        self.post_json("/messages/list", &peer_request(credentials, peer))
            .await
    }

    async fn subscribe(&self, credentials: &Credentials) -> Result<EventStream, CommandError> {
        let url = self.ws_url(credentials)?;
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            CommandError::Unavailable(format!("failed to connect websocket: {e}"))
        })?;
        let (_, mut ws_reader) = ws_stream.split();
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let nickname = credentials.nickname.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(error) => warn!(%nickname, %error, "dropping undecodable server event"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(error) => {
                        warn!(%nickname, %error, "event websocket failed");
                        break;
                    }
                }
            }
            debug!(%nickname, "event websocket finished");
        });

        Ok(rx)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
