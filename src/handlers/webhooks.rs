//! Inbound processor webhook handlers.
//!
//! These endpoints are called by the external processors, not by our own
//! clients, so the response policy is tuned to their retry behavior:
//!
//! - 200 for anything we resolved, including events we chose to ignore,
//!   orphan deliveries, duplicates and consistency mismatches. Returning
//!   an error for those would make the processor redeliver an event we
//!   will never process differently.
//! - 401 only for signature verification failures.
//! - 400 only for bodies we cannot parse at all.
//!
//! The body is taken as raw bytes because signature verification must run
//! over exactly what the processor sent, never a re-serialization.

use crate::{AppState, error::AppError, services::reconciler::{self, WebhookOutcome}};
use axum::{Json, body::Bytes, extract::State, http::HeaderMap};
use serde::Serialize;

/// Acknowledgement body returned for every 200 response.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    /// How the delivery was resolved: processed, ignored, not_found,
    /// duplicate or mismatch
    pub result: &'static str,
}

impl From<&WebhookOutcome> for WebhookAck {
    fn from(outcome: &WebhookOutcome) -> Self {
        let result = match outcome {
            WebhookOutcome::Processed { .. } => "processed",
            WebhookOutcome::Ignored { .. } => "ignored",
            WebhookOutcome::NotFound { .. } => "not_found",
            WebhookOutcome::Duplicate { .. } => "duplicate",
            WebhookOutcome::Mismatch { .. } => "mismatch",
        };
        Self {
            status: "ok",
            result,
        }
    }
}

/// Receive a gateway webhook (HMAC-SHA512 signed).
pub async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let outcome =
        reconciler::process_webhook(&state.pool, &*state.gateway, &headers, &body).await?;
    Ok(Json(WebhookAck::from(&outcome)))
}

/// Receive an aggregator webhook (shared-secret header).
pub async fn onramp_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, AppError> {
    let outcome = reconciler::process_webhook(&state.pool, &*state.onramp, &headers, &body).await?;
    Ok(Json(WebhookAck::from(&outcome)))
}
