use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Snapshot fetch error: {0}")]
    Fetch(String),

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Access required")]
    AccessRequired,

    #[error("Invalid access credential: {0}")]
    InvalidCredential(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Client is disconnected")]
    Cancelled,

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) | AppError::InvalidCredential(_) => StatusCode::BAD_REQUEST,
            AppError::AccessRequired => StatusCode::PAYMENT_REQUIRED,
            AppError::Transport(_)
            | AppError::Fetch(_)
            | AppError::WebSocket(_)
            | AppError::Reqwest(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            AppError::MalformedPayload(_) | AppError::SerdeJson(_) => StatusCode::BAD_GATEWAY,
            AppError::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(AppError::Timeout(500).to_string(), "Request timed out after 500ms");
        assert_eq!(
            AppError::NotFound("roulette x".to_string()).to_string(),
            "Not found: roulette x"
        );
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            AppError::NotFound("x".into()).into_response().status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::InvalidCredential("empty".into()).into_response().status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::Fetch("boom".into()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Timeout(10).into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
