//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.
//!
//! # Error Categories
//!
//! - **Authentication errors**: webhook signature verification failures
//! - **Validation errors**: malformed payloads, invalid initiation input
//! - **Resource errors**: unknown store/order/payment
//! - **Dependency errors**: remote processor call failed or timed out
//! - **Retry errors**: bounded-retry policy violations
//! - **Database errors**: any sqlx::Error from storage operations
//!
//! The status-code policy matters for webhooks: processors interpret
//! non-200 as "please retry", so only signature failures (401), malformed
//! bodies (400) and genuine internal failures (500) are non-200. Orphan,
//! duplicate and ignored deliveries are acknowledged with 200 at the
//! handler layer and never reach this type.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// Application-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed (e.g., connection error, query error).
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Webhook signature is missing or does not match the request body.
    ///
    /// Returns HTTP 401 Unauthorized. The payload is never parsed or
    /// processed when this is raised.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Webhook body is not valid JSON or does not match the processor's
    /// event envelope.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Referenced store does not exist.
    ///
    /// A client error, deliberately distinct from a downstream processor
    /// failure. Returns HTTP 404 Not Found.
    #[error("Store not found")]
    StoreNotFound,

    /// Referenced order does not exist or belongs to a different store.
    #[error("Order not found")]
    OrderNotFound,

    /// Requested payment transaction does not exist.
    ///
    /// Only raised from API lookups and retries. Webhook handlers
    /// acknowledge orphan references with 200 instead of raising this.
    #[error("Payment not found")]
    PaymentNotFound,

    /// A remote processor call failed or timed out.
    ///
    /// The message carries the remote error verbatim so support can see
    /// exactly what the processor reported. Returns HTTP 502 Bad Gateway.
    #[error("Payment processor error: {0}")]
    Dependency(String),

    /// Retry requested past the transaction's max-retry count.
    ///
    /// Rejected outright; no remote call is attempted. Returns HTTP 409.
    #[error("Maximum retry attempts exceeded")]
    RetriesExhausted,

    /// Retry requested for a transaction that is not retryable
    /// (wrong processor or not in a failed state).
    #[error("Retry not allowed: {0}")]
    RetryNotAllowed(String),

    /// The payment changed state while an initiation or retry was in
    /// flight (e.g. a webhook completed it between two steps). The
    /// in-flight operation is abandoned; the committed state wins.
    ///
    /// Returns HTTP 409 Conflict.
    #[error("Payment state changed concurrently: {0}")]
    ConcurrentTransition(String),
}

/// Convert AppError into an HTTP response.
///
/// All errors return JSON in this format:
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Map each error variant to (HTTP status, error code, message)
        let (status, code, message) = match self {
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::MalformedPayload(ref msg) => {
                (StatusCode::BAD_REQUEST, "malformed_payload", msg.clone())
            }
            AppError::InvalidRequest(ref msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", msg.clone())
            }
            AppError::StoreNotFound => {
                (StatusCode::NOT_FOUND, "store_not_found", self.to_string())
            }
            AppError::OrderNotFound => {
                (StatusCode::NOT_FOUND, "order_not_found", self.to_string())
            }
            AppError::PaymentNotFound => {
                (StatusCode::NOT_FOUND, "payment_not_found", self.to_string())
            }
            AppError::Dependency(ref msg) => {
                (StatusCode::BAD_GATEWAY, "processor_error", msg.clone())
            }
            AppError::RetriesExhausted => {
                (StatusCode::CONFLICT, "retries_exhausted", self.to_string())
            }
            AppError::RetryNotAllowed(ref msg) => {
                (StatusCode::CONFLICT, "retry_not_allowed", msg.clone())
            }
            AppError::ConcurrentTransition(ref msg) => {
                (StatusCode::CONFLICT, "concurrent_transition", msg.clone())
            }
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_and_concurrency_conflicts_map_to_409() {
        for err in [
            AppError::RetriesExhausted,
            AppError::RetryNotAllowed("not retryable".to_string()),
            AppError::ConcurrentTransition("changed underneath".to_string()),
        ] {
            assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
        }
    }

    #[test]
    fn signature_failures_map_to_401() {
        assert_eq!(
            AppError::InvalidSignature.into_response().status(),
            StatusCode::UNAUTHORIZED
        );
    }
}
