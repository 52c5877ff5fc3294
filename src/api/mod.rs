pub mod webhooks;

use std::collections::HashMap;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::error::ApiError;
use crate::gateway::connection::{handle_connection, parse_connect_params};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_upgrade))
        .route("/api/webhooks/recall", post(webhooks::recall_webhook))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "rooms": state.manager.room_count(),
        "sessions": state.manager.room_states(),
    }))
}

/// Authenticate before completing the upgrade; bad or missing params get a
/// plain 401 instead of a socket.
async fn ws_upgrade(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let cookie_header = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
    let Some(params) = parse_connect_params(&query, cookie_header) else {
        return ApiError::Unauthorized.into_response();
    };
    if !state.manager.auth().validate(&params.token) {
        return ApiError::Unauthorized.into_response();
    }

    let manager = state.manager.clone();
    ws.on_upgrade(move |socket| handle_connection(manager, socket, params))
        .into_response()
}
