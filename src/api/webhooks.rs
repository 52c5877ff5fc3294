//! Meeting-bot webhook ingress.
//!
//! Thin adapter: verify the signature when a shared secret is configured,
//! resolve the room, and map bot lifecycle/media events onto room operations.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::audio;
use crate::error::ApiError;
use crate::room::SessionRoom;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-recall-signature";

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    event: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    bot_id: Option<String>,
    status: Option<BotStatus>,
    transcript: Option<BotTranscript>,
    audio: Option<String>,
    metadata: Option<BotMetadata>,
}

#[derive(Debug, Deserialize)]
struct BotStatus {
    code: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BotTranscript {
    speaker: String,
    text: String,
    start_time: f64,
    end_time: f64,
}

#[derive(Debug, Deserialize)]
struct BotMetadata {
    session_id: Option<String>,
}

pub async fn recall_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(secret) = state
        .config
        .recall
        .as_ref()
        .and_then(|r| r.webhook_secret.as_deref())
    {
        verify_signature(&headers, &body, secret)?;
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|e| ApiError::InvalidInput(format!("invalid webhook body: {e}")))?;

    let Some(room) = resolve_room(&state, &envelope.data) else {
        // Acknowledge unknown bots so the service stops retrying.
        tracing::warn!(event = %envelope.event, "Webhook for unknown session");
        return Ok(StatusCode::OK);
    };

    tracing::debug!(
        event = %envelope.event,
        session_id = %room.session_id(),
        "Bot webhook received"
    );

    match envelope.event.as_str() {
        "join_call" => room.handle_bot_joined(),
        "leave_call" => room.handle_bot_left().await,
        "media.done" => room.handle_bot_done(),
        "status_change" => {
            if let Some(status) = envelope.data.status {
                if status.code == "fatal" {
                    room.handle_bot_fatal(
                        status
                            .message
                            .unwrap_or_else(|| "meeting bot failed".into()),
                    );
                } else {
                    tracing::info!(
                        session_id = %room.session_id(),
                        code = %status.code,
                        "Bot status change"
                    );
                }
            }
        }
        "transcript" => {
            if let Some(t) = envelope.data.transcript {
                room.handle_bot_transcript(&t.speaker, t.text, t.start_time, t.end_time);
            }
        }
        "audio" => {
            if let Some(b64) = envelope.data.audio {
                match audio::from_base64(&b64) {
                    Ok(bytes) => room.handle_recall_audio(bytes),
                    Err(_) => {
                        return Err(ApiError::InvalidInput(
                            "audio payload is not valid base64".into(),
                        ));
                    }
                }
            }
        }
        other => {
            tracing::debug!(event = %other, "Ignoring bot event");
        }
    }

    Ok(StatusCode::OK)
}

fn resolve_room(state: &AppState, data: &WebhookData) -> Option<Arc<SessionRoom>> {
    if let Some(session_id) = data
        .metadata
        .as_ref()
        .and_then(|m| m.session_id.as_deref())
    {
        if let Some(room) = state.manager.get_room(session_id) {
            return Some(room);
        }
    }
    data.bot_id
        .as_deref()
        .and_then(|bot_id| state.manager.find_room_by_bot(bot_id))
}

/// Constant-time HMAC-SHA256 check over the raw body.
fn verify_signature(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<(), ApiError> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::InvalidSignature)?;
    let provided = provided.strip_prefix("sha256=").unwrap_or(provided);
    let signature = hex::decode(provided).map_err(|_| ApiError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ApiError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&signature)
        .map_err(|_| ApiError::InvalidSignature)
}
