use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        rejection::JsonRejection,
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use server_api::ApiContext;
use shared::{
    domain::{Credentials, Message, Nickname},
    error::{ApiError, ErrorCode},
    protocol::{
        AuthenticatedRequest, CheckResponse, NicknameStatusResponse, PeerRequest, RegisterRequest,
        RegisterResponse, SendMessageRequest, ServerEvent,
    },
};
use storage::Storage;
use tokio::sync::broadcast::{self, error::RecvError};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

const MAX_BODY_BYTES: usize = 64 * 1024;

type HttpError = (StatusCode, Json<ApiError>);

#[derive(Debug, Deserialize)]
struct WsQuery {
    nickname: String,
    auth_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let (events, _) = broadcast::channel(settings.event_buffer);

    let state = AppState {
        api: ApiContext { storage },
        events,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/nicknames/:nickname", get(http_nickname_status))
        .route("/register", post(http_register))
        .route("/check", post(http_check))
        .route("/requests", post(http_send_request))
        .route("/requests/incoming", post(http_incoming_requests))
        .route("/requests/outgoing", post(http_outgoing_requests))
        .route("/requests/accept", post(http_accept_request))
        .route("/requests/decline", post(http_decline_request))
        .route("/friends", post(http_friends))
        .route("/messages", post(http_send_message))
        .route("/messages/list", post(http_list_messages))
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Conflict => StatusCode::CONFLICT,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn http_error(err: ApiError) -> HttpError {
    if err.code == ErrorCode::Internal {
        error!(message = %err.message, "request failed");
    }
    (status_for(err.code), Json(err))
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, HttpError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| http_error(ApiError::validation(rejection.body_text())))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, HttpError> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| http_error(ApiError::new(ErrorCode::Internal, e.to_string())))?;
    Ok("ok")
}

async fn http_nickname_status(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<Json<NicknameStatusResponse>, HttpError> {
    let nickname =
        Nickname::parse(&raw).map_err(|e| http_error(ApiError::validation(e.to_string())))?;
    let taken = server_api::nickname_is_taken(&state.api, &nickname)
        .await
        .map_err(http_error)?;
    Ok(Json(NicknameStatusResponse { nickname, taken }))
}

async fn http_register(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, HttpError> {
    let req = json_body(payload)?;
    let credentials = server_api::register(&state.api, &req.nickname)
        .await
        .map_err(http_error)?;
    Ok(Json(RegisterResponse { credentials }))
}

async fn http_check(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthenticatedRequest>, JsonRejection>,
) -> Result<Json<CheckResponse>, HttpError> {
    let req = json_body(payload)?;
    let valid = server_api::check_account(&state.api, &req.credentials)
        .await
        .map_err(http_error)?;
    Ok(Json(CheckResponse { valid }))
}

async fn http_send_request(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PeerRequest>, JsonRejection>,
) -> Result<StatusCode, HttpError> {
    let req = json_body(payload)?;
    let event = server_api::send_friend_request(&state.api, &req.credentials, &req.peer)
        .await
        .map_err(http_error)?;
    state.publish(event);
    Ok(StatusCode::NO_CONTENT)
}

async fn http_incoming_requests(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthenticatedRequest>, JsonRejection>,
) -> Result<Json<Vec<Nickname>>, HttpError> {
    let req = json_body(payload)?;
    let requests = server_api::incoming_requests(&state.api, &req.credentials)
        .await
        .map_err(http_error)?;
    Ok(Json(requests))
}

async fn http_outgoing_requests(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthenticatedRequest>, JsonRejection>,
) -> Result<Json<Vec<Nickname>>, HttpError> {
    let req = json_body(payload)?;
    let requests = server_api::outgoing_requests(&state.api, &req.credentials)
        .await
        .map_err(http_error)?;
    Ok(Json(requests))
}

async fn http_accept_request(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PeerRequest>, JsonRejection>,
) -> Result<StatusCode, HttpError> {
    let req = json_body(payload)?;
    let event = server_api::accept_friend_request(&state.api, &req.credentials, &req.peer)
        .await
        .map_err(http_error)?;
    if let Some(event) = event {
        state.publish(event);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn http_decline_request(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PeerRequest>, JsonRejection>,
) -> Result<StatusCode, HttpError> {
    let req = json_body(payload)?;
    let event = server_api::decline_friend_request(&state.api, &req.credentials, &req.peer)
        .await
        .map_err(http_error)?;
    state.publish(event);
    Ok(StatusCode::NO_CONTENT)
}

async fn http_friends(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<AuthenticatedRequest>, JsonRejection>,
) -> Result<Json<Vec<Nickname>>, HttpError> {
    let req = json_body(payload)?;
    let friends = server_api::friends(&state.api, &req.credentials)
        .await
        .map_err(http_error)?;
    Ok(Json(friends))
}

async fn http_send_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<Message>, HttpError> {
    let req = json_body(payload)?;
    let (message, event) =
        server_api::send_message(&state.api, &req.credentials, &req.peer, &req.text, req.reply)
            .await
            .map_err(http_error)?;
    state.publish(event);
    Ok(Json(message))
}

async fn http_list_messages(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PeerRequest>, JsonRejection>,
) -> Result<Json<Vec<Message>>, HttpError> {
    let req = json_body(payload)?;
    let messages = server_api::list_messages(&state.api, &req.credentials, &req.peer)
        .await
        .map_err(http_error)?;
    Ok(Json(messages))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> Result<Response, HttpError> {
    let nickname =
        Nickname::parse(&q.nickname).map_err(|e| http_error(ApiError::validation(e.to_string())))?;
    let credentials = Credentials {
        nickname,
        auth_key: q.auth_key,
    };
    let user = server_api::authenticate(&state.api, &credentials)
        .await
        .map_err(http_error)?;
    Ok(ws
        .on_upgrade(move |socket| ws_connection(state, socket, user.nickname))
        .into_response())
}

async fn ws_connection(state: Arc<AppState>, socket: WebSocket, nickname: Nickname) {
    use futures::{SinkExt, StreamExt};

    debug!(%nickname, "websocket connected");
    let (mut sender, mut receiver) = socket.split();
    let mut events_rx = state.events.subscribe();

    let filter_nickname = nickname.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let event: ServerEvent = match events_rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(nickname = %filter_nickname, skipped, "websocket subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if !event.concerns(&filter_nickname) {
                continue;
            }
            let text = match serde_json::to_string(&event) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if sender.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(_msg)) = receiver.next().await {}

    send_task.abort();
    debug!(%nickname, "websocket closed");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
