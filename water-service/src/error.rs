use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use water_client::StoreError;

use crate::{calendar::CalendarError, consumption::ConsumptionError, pipeline::PipelineError};

/// HTTP-facing error: a status code and a message rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Logs the cause; the client only sees a generic message.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "internal error");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::internal(e)
    }
}

impl From<CalendarError> for ApiError {
    fn from(e: CalendarError) -> Self {
        ApiError::bad_request(e.to_string())
    }
}

impl From<ConsumptionError> for ApiError {
    fn from(e: ConsumptionError) -> Self {
        match e {
            ConsumptionError::Validation(msg) => ApiError::bad_request(msg),
            ConsumptionError::NotFound(msg) => ApiError::not_found(msg),
            ConsumptionError::Store(e) => e.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::Transform(msg) => ApiError::bad_request(msg),
            PipelineError::Source(msg) | PipelineError::Sink(msg) => {
                tracing::error!(error = %msg, "ingestion unavailable");
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "ingestion unavailable")
            }
        }
    }
}
