//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use vproc_models::DescriptorError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Queue error: {0}")]
    Queue(#[from] vproc_queue::QueueError),
}

impl ApiError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) | ApiError::Queue(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn headline(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest(_) => "Invalid request",
            ApiError::NotFound(_) => "Not found",
            ApiError::RateLimited => "Rate limited",
            ApiError::Internal(_) | ApiError::Queue(_) => "Internal error",
        }
    }

    fn detail(&self) -> String {
        match self {
            ApiError::InvalidRequest(msg) | ApiError::NotFound(msg) | ApiError::Internal(msg) => {
                msg.clone()
            }
            ApiError::RateLimited => "Please try again later".to_string(),
            ApiError::Queue(e) => e.to_string(),
        }
    }
}

impl From<DescriptorError> for ApiError {
    fn from(e: DescriptorError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: &'static str,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Don't expose internal error details in production
        let error = match &self {
            ApiError::Internal(_) | ApiError::Queue(_)
                if std::env::var("ENVIRONMENT").unwrap_or_default() == "production" =>
            {
                "An internal error occurred".to_string()
            }
            _ => self.detail(),
        };

        let body = ErrorResponse {
            message: self.headline(),
            error,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_error_maps_to_invalid_request() {
        let err: ApiError = DescriptorError::MissingSourceReference.into();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.headline(), "Invalid request");
        assert_eq!(err.detail(), "video_url is required");
    }

    #[test]
    fn test_not_found_status() {
        assert_eq!(ApiError::not_found("task").status_code(), StatusCode::NOT_FOUND);
    }
}
