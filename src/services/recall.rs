//! Meeting-bot control client.
//!
//! The bot service is an opaque audio producer; this client only creates a
//! bot for a meeting URL and asks it to leave. Everything else arrives
//! through the webhook ingress.

use serde::Deserialize;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum RecallError {
    #[error("bot service request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bot service returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
}

#[derive(Debug, Deserialize)]
struct CreateBotResponse {
    id: String,
}

pub struct RecallClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    webhook_base_url: Option<String>,
}

impl RecallClient {
    pub fn new(api_key: String, base_url: String, webhook_base_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            webhook_base_url,
        }
    }

    /// Dispatch a bot into a meeting. Returns the bot id used for later
    /// webhook correlation and for `stop_bot`.
    pub async fn create_bot(
        &self,
        meeting_url: &str,
        session_id: &str,
    ) -> Result<String, RecallError> {
        let mut body = json!({
            "meeting_url": meeting_url,
            "bot_name": "Parley Notetaker",
            "recording_config": {
                "audio_mixed_raw": {},
            },
            "metadata": { "session_id": session_id },
        });
        if let Some(base) = &self.webhook_base_url {
            body["webhook_url"] = json!(format!("{}/api/webhooks/recall", base.trim_end_matches('/')));
        }

        let response = self
            .http
            .post(format!("{}/api/v1/bot", self.base_url))
            .header("Authorization", format!("Token {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::Status { status, body });
        }

        let created: CreateBotResponse = response.json().await?;
        tracing::info!(session_id = %session_id, bot_id = %created.id, "Meeting bot dispatched");
        Ok(created.id)
    }

    /// Ask a bot to leave its call. Best-effort; callers log and move on.
    pub async fn stop_bot(&self, bot_id: &str) -> Result<(), RecallError> {
        let response = self
            .http
            .post(format!("{}/api/v1/bot/{}/leave_call", self.base_url, bot_id))
            .header("Authorization", format!("Token {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RecallError::Status { status, body });
        }
        tracing::info!(bot_id = %bot_id, "Meeting bot stopped");
        Ok(())
    }
}
