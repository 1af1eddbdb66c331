//! HTTP and WebSocket transport.

use crate::connections::ConnectionHandle;
use crate::coordinator::{Coordinator, Flow};
use crate::protocol::ServerMessage;
use crate::store::Leaderboard;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

const DEFAULT_LEADERBOARD_LIMIT: i64 = 50;
const MAX_LEADERBOARD_LIMIT: i64 = 500;
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    coordinator: Coordinator,
}

impl AppState {
    /// Wraps a coordinator.
    pub fn new(coordinator: Coordinator) -> Self {
        Self { coordinator }
    }
}

/// Builds the application router.
pub fn router(coordinator: Coordinator) -> Router {
    Router::new()
        .route("/ws/game", get(game_socket))
        .route("/health", get(health))
        .route("/leaderboard", get(leaderboard))
        .with_state(AppState::new(coordinator))
}

/// Binds `address` and serves until the process is stopped.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
#[instrument(skip(coordinator))]
pub async fn serve(address: &str, coordinator: Coordinator) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!(address = %address, "Server listening");
    axum::serve(listener, router(coordinator)).await
}

#[derive(Debug, Deserialize)]
struct SocketParams {
    token: Option<String>,
}

async fn game_socket(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = params.token.unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state.coordinator, token))
}

#[instrument(skip_all)]
async fn handle_socket(socket: WebSocket, coordinator: Coordinator, token: String) {
    let (mut sender, mut receiver) = socket.split();
    let (conn, mut outbound) = ConnectionHandle::channel();

    // Drains until every handle for this socket is dropped, then closes.
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                return;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let identity = match coordinator.connect(&token, &conn).await {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "WebSocket connection rejected");
            conn.send(ServerMessage::error(&err));
            drop(conn);
            let _ = tokio::time::timeout(FLUSH_TIMEOUT, send_task).await;
            return;
        }
    };

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) => {
                let flow = coordinator
                    .handle_text(&identity, &token, &conn, text.as_str())
                    .await;
                if flow == Flow::Close {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) => {
                debug!("Ignoring binary frame");
            }
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    coordinator.disconnect(*identity.user_id(), conn.id()).await;
    drop(conn);
    if tokio::time::timeout(FLUSH_TIMEOUT, send_task).await.is_err() {
        debug!("Send task did not finish in time");
    }
    info!(user_id = identity.user_id(), "WebSocket connection closed");
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

#[derive(Debug, Deserialize)]
struct LeaderboardParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn leaderboard(
    Query(params): Query<LeaderboardParams>,
    State(state): State<AppState>,
) -> Result<Json<Leaderboard>, (StatusCode, Json<serde_json::Value>)> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_LEADERBOARD_LIMIT)
        .clamp(0, MAX_LEADERBOARD_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    state
        .coordinator
        .store()
        .leaderboard(limit, offset)
        .await
        .map(Json)
        .map_err(|err| {
            error!(error = %err, "Leaderboard query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "Failed to load leaderboard" })),
            )
        })
}
