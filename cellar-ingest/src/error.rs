//! Error types for cellar-ingest
//!
//! Component errors (extraction, sync, outbox) are mapped onto `ApiError`
//! at the HTTP boundary; each variant fixes the response status code.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::inventory_client::InventoryError;
use crate::services::match_engine::RecognitionError;
use crate::services::outbox_dispatcher::OutboxError;
use crate::services::sync_engine::SyncError;
use crate::services::vision_client::ExtractionError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing caller identity (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict (409) - e.g., sync already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Vision provider rate limit (429)
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Vision provider quota exhausted (402)
    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    /// Upstream provider or external system failure (502)
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Required collaborator not configured (503)
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// cellar-common error
    #[error("Common error: {0}")]
    Common(#[from] cellar_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::RateLimited(msg) => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMITED", msg),
            ApiError::QuotaExhausted(msg) => {
                (StatusCode::PAYMENT_REQUIRED, "QUOTA_EXHAUSTED", msg)
            }
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(ref err) => match err {
                cellar_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                cellar_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                _ => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    err.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<ExtractionError> for ApiError {
    fn from(err: ExtractionError) -> Self {
        let message = err.to_string();
        match err {
            ExtractionError::RateLimited(_) => ApiError::RateLimited(message),
            ExtractionError::QuotaExhausted(_) => ApiError::QuotaExhausted(message),
            ExtractionError::NotConfigured(_) => ApiError::ServiceUnavailable(message),
            _ => ApiError::BadGateway(message),
        }
    }
}

impl From<RecognitionError> for ApiError {
    fn from(err: RecognitionError) -> Self {
        match err {
            RecognitionError::Provider { attempt_id, source } => {
                match ApiError::from(source) {
                    ApiError::RateLimited(msg) => {
                        ApiError::RateLimited(format!("{} (attempt {})", msg, attempt_id))
                    }
                    ApiError::QuotaExhausted(msg) => {
                        ApiError::QuotaExhausted(format!("{} (attempt {})", msg, attempt_id))
                    }
                    ApiError::ServiceUnavailable(msg) => {
                        ApiError::ServiceUnavailable(format!("{} (attempt {})", msg, attempt_id))
                    }
                    ApiError::BadGateway(msg) => {
                        ApiError::BadGateway(format!("{} (attempt {})", msg, attempt_id))
                    }
                    other => other,
                }
            }
            RecognitionError::Common(e) => ApiError::Common(e),
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InProgress { .. } => ApiError::Conflict(err.to_string()),
            SyncError::External(e) => ApiError::BadGateway(e.to_string()),
            SyncError::Common(e) => ApiError::Common(e),
        }
    }
}

impl From<OutboxError> for ApiError {
    fn from(err: OutboxError) -> Self {
        match err {
            OutboxError::SessionNotFound(id) => {
                ApiError::NotFound(format!("Counting session {}", id))
            }
            OutboxError::SessionNotSubmittable { .. } | OutboxError::EmptySession(_) => {
                ApiError::BadRequest(err.to_string())
            }
            OutboxError::JobNotFound(id) => ApiError::NotFound(format!("Outbox job {}", id)),
            OutboxError::Common(e) => ApiError::Common(e),
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(err: InventoryError) -> Self {
        ApiError::BadGateway(err.to_string())
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
