//! Unified error handling for orcd.
//!
//! This module provides the transport-agnostic error taxonomy shared by the
//! entity store, stream engine and orchestrator, with automatic HTTP
//! mapping and metric labeling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

// ============================================================================
// Core errors (operation processing)
// ============================================================================

/// Errors that can occur while processing an operation.
///
/// Validation errors never mutate state; the orchestrator maps each variant
/// onto the transport (HTTP status or a WS `error` frame).
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    #[error("{0}")]
    BadRequest(String),

    #[error("missing, invalid or expired credentials")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("room name already in use")]
    Conflict,

    #[error("requested range has been pruned")]
    HistoryPruned,

    #[error("payload exceeds the configured limit")]
    PayloadTooLarge,

    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("second factor required")]
    OtpRequired,

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Convenience constructor for validation failures.
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    /// Convenience constructor for permission failures.
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Get a static error code string for wire bodies and metrics labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict => "conflict",
            Self::HistoryPruned => "history_pruned",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited { .. } => "rate_limited",
            Self::OtpRequired => "otp_required",
            Self::Internal(_) => "internal",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized | Self::OtpRequired => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict => StatusCode::CONFLICT,
            Self::HistoryPruned => StatusCode::GONE,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for CoreError {
    /// Convert to the canonical `{error:{code,message}}` JSON response.
    fn into_response(self) -> Response {
        if matches!(self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal error surfaced to client");
        }
        crate::metrics::ERRORS_RETURNED
            .with_label_values(&[self.error_code()])
            .inc();

        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));

        let mut response = (self.status(), body).into_response();
        if let Self::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CoreError::Unauthorized.error_code(), "unauthorized");
        assert_eq!(CoreError::Conflict.error_code(), "conflict");
        assert_eq!(CoreError::HistoryPruned.error_code(), "history_pruned");
        assert_eq!(CoreError::bad_request("nope").error_code(), "bad_request");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(CoreError::NotFound("room").status(), StatusCode::NOT_FOUND);
        assert_eq!(CoreError::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(CoreError::HistoryPruned.status(), StatusCode::GONE);
        assert_eq!(
            CoreError::PayloadTooLarge.status(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(CoreError::OtpRequired.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_retry_after_header() {
        let resp = CoreError::RateLimited { retry_after_secs: 30 }.into_response();
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            resp.headers().get("Retry-After").and_then(|v| v.to_str().ok()),
            Some("30")
        );
    }
}
