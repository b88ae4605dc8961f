//! WebSocket server + REST endpoints exposing the polling session to the dashboard.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::poller::SessionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

/// Build the Axum router with session WebSocket and REST routes.
pub fn session_routes(sessions: Arc<SessionManager>) -> Router {
    let state = AppState { sessions };

    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route(
            "/api/session",
            get(get_session).post(start_session).delete(stop_session),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "portfolio-poll"
    }))
}

// ── REST Endpoints ──────────────────────────────────────────────────────

async fn get_session(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.sessions.snapshot().await)
}

#[derive(Deserialize)]
struct StartRequest {
    job_id: String,
}

async fn start_session(
    State(state): State<AppState>,
    Json(body): Json<StartRequest>,
) -> impl IntoResponse {
    match state.sessions.start(body.job_id).await {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"run_id": run_id, "status": "started"})),
        ),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": e.to_string()})),
        ),
    }
}

async fn stop_session(State(state): State<AppState>) -> impl IntoResponse {
    state.sessions.stop().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({"status": "stopped"})),
    )
}

// ── WebSocket ───────────────────────────────────────────────────────────

/// Frames a dashboard client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientAction {
    Start { job_id: String },
    Stop,
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state.sessions))
}

async fn send_snapshot(socket: &mut WebSocket, sessions: &SessionManager) -> bool {
    let snapshot = sessions.snapshot().await;
    let frame = serde_json::json!({"type": "snapshot", "snapshot": snapshot});
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .is_ok()
}

async fn handle_socket(mut socket: WebSocket, sessions: Arc<SessionManager>) {
    info!("WebSocket client connected");

    // Subscribe before the initial snapshot so nothing falls in between.
    let mut rx = sessions.subscribe();

    if !send_snapshot(&mut socket, &sessions).await {
        warn!("Failed to send initial snapshot, client disconnected");
        return;
    }

    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if let Ok(json) = serde_json::to_string(&event) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client disconnected during send");
                                break;
                            }
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, "WS client lagged behind broadcast");
                        if !send_snapshot(&mut socket, &sessions).await {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        debug!("Broadcast channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &sessions).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!("WebSocket connection closed");
}

async fn handle_client_message(text: &str, sessions: &SessionManager) {
    match serde_json::from_str::<ClientAction>(text) {
        Ok(ClientAction::Start { job_id }) => match sessions.start(job_id).await {
            Ok(run_id) => info!(run_id = %run_id, "Session started via WS"),
            Err(e) => warn!(error = %e, "Start via WS rejected"),
        },
        Ok(ClientAction::Stop) => {
            sessions.stop().await;
            info!("Session stopped via WS");
        }
        Err(e) => {
            debug!(error = %e, text = text, "Unrecognized WS message from client");
        }
    }
}
