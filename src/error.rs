use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// HTTP-side errors (webhook ingress and upgrade rejection). Wire-level
/// errors travel as frames, not as HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid webhook signature")]
    InvalidSignature,

    #[error("{0}")]
    InvalidInput(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized | ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        };

        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
