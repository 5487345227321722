//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures errors to Sentry before
//! responding to the client. All route handlers should return `Result<T, AppError>`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::providers::GatewayError;

/// Application-level error type for the shop.
#[derive(Debug, Error)]
pub enum AppError {
    /// Store operation failed.
    #[error("store error: {0}")]
    Database(#[from] RepositoryError),

    /// Payment provider call failed.
    #[error("payment gateway error: {0}")]
    Gateway(GatewayError),

    /// No authenticated identity on the request.
    #[error("not authenticated")]
    Unauthenticated,

    /// Checkout attempted with an empty cart.
    #[error("cart is empty")]
    EmptyCart,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request conflicts with the current state of the resource
    /// (e.g., confirming success on a cancelled order).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Download entitlement has no redemptions left.
    #[error("download limit exceeded ({count}/{limit})")]
    LimitExceeded { count: u32, limit: u32 },

    /// Provider callback failed authenticity verification. Rejected with no
    /// side effects.
    #[error("provider verification failed: {0}")]
    ProviderVerification(String),

    /// Bad request from client.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidSignature => {
                Self::ProviderVerification("invalid callback signature".to_owned())
            }
            GatewayError::MalformedPayload(msg) => {
                Self::ProviderVerification(format!("malformed callback payload: {msg}"))
            }
            other => Self::Gateway(other),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Capture server errors to Sentry
        if matches!(
            self,
            Self::Database(_) | Self::Internal(_) | Self::Gateway(_)
        ) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let status = match &self {
            Self::Database(RepositoryError::NotFound) | Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::EmptyCart | Self::BadRequest(_) | Self::ProviderVerification(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::LimitExceeded { .. } => StatusCode::FORBIDDEN,
        };

        // Don't expose internal error details to clients
        let body = match &self {
            Self::Database(RepositoryError::NotFound) => json!({ "error": "not found" }),
            Self::Database(_) | Self::Internal(_) => json!({ "error": "internal server error" }),
            Self::Gateway(_) => json!({ "error": "payment provider error" }),
            Self::LimitExceeded { count, limit } => json!({
                "error": "download limit exceeded",
                "download_count": count,
                "max_downloads": limit,
            }),
            _ => json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("order 123".to_string());
        assert_eq!(err.to_string(), "not found: order 123");

        let err = AppError::LimitExceeded {
            count: 10,
            limit: 10,
        };
        assert_eq!(err.to_string(), "download limit exceeded (10/10)");
    }

    #[test]
    fn test_app_error_status_codes() {
        assert_eq!(get_status(AppError::Unauthenticated), StatusCode::UNAUTHORIZED);
        assert_eq!(get_status(AppError::EmptyCart), StatusCode::BAD_REQUEST);
        assert_eq!(
            get_status(AppError::NotFound("test".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            get_status(AppError::Conflict("test".to_string())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            get_status(AppError::LimitExceeded { count: 10, limit: 10 }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            get_status(AppError::ProviderVerification("bad signature".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(AppError::Internal("test".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(AppError::Database(RepositoryError::NotFound)),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_signature_failure_maps_to_verification_error() {
        let err = AppError::from(GatewayError::InvalidSignature);
        assert!(matches!(err, AppError::ProviderVerification(_)));
        assert_eq!(get_status(err), StatusCode::BAD_REQUEST);
    }
}
