//! Maps journey service errors onto HTTP responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use carepath_core::error::JourneyError;
use tracing::{error, warn};

use crate::rest::ErrorResponse;

/// Error returned by REST handlers. Serialized as `{"error": "<message>"}`.
#[derive(Debug)]
pub enum ApiError {
    Validation(String),
    JourneyNotFound,
    RunNotFound,
    Conflict(String),
    Internal(String),
}

impl From<JourneyError> for ApiError {
    fn from(err: JourneyError) -> Self {
        match err {
            JourneyError::Validation(msg) => ApiError::Validation(msg),
            JourneyError::JourneyNotFound(_) => ApiError::JourneyNotFound,
            JourneyError::RunNotFound(_) => ApiError::RunNotFound,
            e @ JourneyError::RunFinished { .. } => ApiError::Conflict(e.to_string()),
            e @ JourneyError::Store(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => {
                warn!(error = %msg, "Request validation failed");
                metrics::counter!("api.validation_errors").increment(1);
                (StatusCode::BAD_REQUEST, msg)
            }
            ApiError::JourneyNotFound => (StatusCode::NOT_FOUND, "Journey not found".to_string()),
            ApiError::RunNotFound => (StatusCode::NOT_FOUND, "Journey run not found".to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(detail) => {
                error!(error = %detail, "Request failed");
                metrics::counter!("api.errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
