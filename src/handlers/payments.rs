//! Payment HTTP handlers.
//!
//! This module implements the payment API endpoints:
//! - POST /api/v1/payments/gateway/initiate - Card/PWA checkout via the gateway
//! - POST /api/v1/payments/onramp/initiate - STK push via the crypto aggregator
//! - POST /api/v1/payments/{id}/retry - Re-drive a failed aggregator payment
//! - GET /api/v1/payments/{id} - Payment lookup with audit trail

use crate::{
    AppState,
    error::AppError,
    models::payment::{InitiatePaymentRequest, InitiatePaymentResponse, PaymentResponse},
    services::initiation,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

/// Initiate a gateway (card / payment page) payment.
///
/// # Request Body
///
/// ```json
/// {
///   "store_id": "550e8400-...",
///   "order_id": "660e8400-...",
///   "amount": 1500.0,
///   "currency": "KES",
///   "customer_phone": "+254712345678",
///   "customer_email": "jane@example.com"
/// }
/// ```
///
/// # Response (201)
///
/// ```json
/// {
///   "payment_id": "770e8400-...",
///   "reference": "JIR_1718034000123_x7Kp2mQa",
///   "status": "initialized",
///   "kind": "redirect",
///   "access_code": "ac_19x2b",
///   "authorization_url": "https://checkout.gateway.example/ac_19x2b"
/// }
/// ```
pub async fn initiate_gateway_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), AppError> {
    let response = initiation::initiate_payment(&state.pool, &*state.gateway, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Initiate an aggregator (STK push) payment.
///
/// The customer receives a push prompt on their phone; completion arrives
/// asynchronously via the aggregator webhook.
pub async fn initiate_onramp_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<(StatusCode, Json<InitiatePaymentResponse>), AppError> {
    let response = initiation::initiate_payment(&state.pool, &*state.onramp, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Retry a failed aggregator payment.
///
/// # Validation
///
/// - Payment must exist and be in `failed` status
/// - Gateway payments are rejected (re-open the checkout link instead)
/// - Retry count must be below the per-payment bound
pub async fn retry_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<InitiatePaymentResponse>, AppError> {
    let response = initiation::retry_payment(&state.pool, &*state.onramp, payment_id).await?;
    Ok(Json(response))
}

/// Get payment by ID, audit trail included.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<PaymentResponse>, AppError> {
    let payment = initiation::find_payment(&state.pool, payment_id).await?;
    Ok(Json(payment.into()))
}
