use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the limiter and the service around it.
#[derive(Debug, Error)]
pub enum ThrottlerError {
    /// The draw can never fit under the ceiling, no matter how long we wait.
    #[error("requested {requested:.0} tokens exceeds the admissible ceiling of {ceiling:.0}")]
    CapacityExceeded { requested: f64, ceiling: f64 },

    #[error("gave up reserving {requested} tokens after {attempts} attempts")]
    RateLimitTimeout { requested: u64, attempts: u32 },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("limiter not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ThrottlerError>;

impl ThrottlerError {
    /// Whether a caller may reasonably try the same call again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ThrottlerError::RateLimitTimeout { .. } | ThrottlerError::StoreUnavailable(_)
        )
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ThrottlerError::CapacityExceeded { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ThrottlerError::RateLimitTimeout { .. } => StatusCode::TOO_MANY_REQUESTS,
            ThrottlerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ThrottlerError::Validation(_) => StatusCode::BAD_REQUEST,
            ThrottlerError::NotFound(_) => StatusCode::NOT_FOUND,
            ThrottlerError::Config(_) | ThrottlerError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ThrottlerError::CapacityExceeded { .. } => "capacity_exceeded",
            ThrottlerError::RateLimitTimeout { .. } => "rate_limit_timeout",
            ThrottlerError::StoreUnavailable(_) => "service_unavailable",
            ThrottlerError::Validation(_) => "validation_error",
            ThrottlerError::NotFound(_) => "not_found",
            ThrottlerError::Config(_) => "configuration_error",
            ThrottlerError::Internal(_) => "internal_error",
        }
    }
}

impl From<StoreError> for ThrottlerError {
    fn from(err: StoreError) -> Self {
        ThrottlerError::StoreUnavailable(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ThrottlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        ThrottlerError::Validation(err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str, code: u16) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            code,
        }
    }

    pub fn from_error(err: &ThrottlerError) -> Self {
        Self::new(err.error_code(), &err.to_string(), err.status_code().as_u16())
    }
}

/// Seconds a client should back off after a timed-out acquisition.
const RETRY_AFTER_SECS: &str = "60";

impl IntoResponse for ThrottlerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::from_error(&self);
        let mut resp = (status, Json(body)).into_response();

        if matches!(self, ThrottlerError::RateLimitTimeout { .. }) {
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }

        resp
    }
}
