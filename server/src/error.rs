//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Engine error: {0}")]
    Engine(#[from] roster_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use roster_engine::Error as EngineError;

        let (status, error_message, details) = match &self {
            AppError::Engine(EngineError::RecordNotFound(id)) => (
                StatusCode::NOT_FOUND,
                format!("Player {} not found", id),
                None,
            ),
            AppError::Engine(e @ (EngineError::InvalidFields(_) | EngineError::InvalidQuery(_))) => {
                tracing::warn!("Engine error: {:?}", e);
                (StatusCode::BAD_REQUEST, e.to_string(), None)
            }
            AppError::Engine(e) => {
                tracing::error!("Engine error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Engine error".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (
                AppError::Engine(roster_engine::Error::RecordNotFound(3)),
                StatusCode::NOT_FOUND,
            ),
            (
                AppError::Engine(roster_engine::Error::InvalidFields("id".into())),
                StatusCode::BAD_REQUEST,
            ),
            (
                AppError::Engine(roster_engine::Error::ControllerClosed),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::BadRequest("name".into()), StatusCode::BAD_REQUEST),
        ];

        for (error, status) in cases {
            assert_eq!(error.into_response().status(), status);
        }
    }
}
