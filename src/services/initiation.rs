//! Payment initiation and retry orchestration.
//!
//! Validates the caller's input against local state (store, order,
//! amount), then hands the validated parameters to the selected
//! processor. Processor failures surface as they are; validation
//! failures never reach the processor at all.

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{InitiatePaymentRequest, InitiatePaymentResponse, PaymentStatus,
    PaymentTransaction};
use crate::models::store::{Order, Store};
use crate::processors::{InitiationParams, PaymentProcessor};

/// Validate and initiate a payment through the given processor.
pub async fn initiate_payment(
    pool: &DbPool,
    processor: &dyn PaymentProcessor,
    request: InitiatePaymentRequest,
) -> Result<InitiatePaymentResponse, AppError> {
    if request.amount <= Decimal::ZERO {
        return Err(AppError::InvalidRequest(
            "amount must be greater than zero".to_string(),
        ));
    }

    let store = find_store(pool, request.store_id).await?;

    if let Some(order_id) = request.order_id {
        let order = find_order(pool, order_id).await?;
        if order.store_id != store.id {
            // Treated as not-found rather than forbidden: callers learn
            // nothing about orders outside their store
            return Err(AppError::OrderNotFound);
        }
        if order.status != "pending" {
            return Err(AppError::InvalidRequest(format!(
                "order {} is not payable (status: {})",
                order.id, order.status
            )));
        }
    }

    let params = InitiationParams {
        store_id: request.store_id,
        order_id: request.order_id,
        amount: request.amount,
        currency: request.currency.to_uppercase(),
        customer_phone: request.customer_phone,
        customer_email: request.customer_email,
        customer_name: request.customer_name,
        metadata: request.metadata,
    };

    tracing::info!(
        processor = processor.name(),
        store_id = %params.store_id,
        amount = %params.amount,
        currency = %params.currency,
        "initiating payment"
    );

    processor.initiate(params).await
}

/// Re-drive a failed aggregator initiation.
///
/// The retry counter is bumped before the processor is contacted, so a
/// crash mid-retry consumes the attempt rather than granting a free one.
///
/// The bump is a single conditional UPDATE that re-checks the failed
/// status and the retry bound, so two concurrent retries at the last
/// allowed attempt cannot both pass: one takes the slot, the other gets
/// zero rows back and is rejected. The pure [`ensure_retryable`] gate
/// still runs first for its precise error messages (wrong processor,
/// wrong status); the UPDATE is what actually enforces the bound.
pub async fn retry_payment(
    pool: &DbPool,
    processor: &dyn PaymentProcessor,
    payment_id: Uuid,
) -> Result<InitiatePaymentResponse, AppError> {
    let payment = find_payment(pool, payment_id).await?;

    ensure_retryable(&payment)?;

    let payment = sqlx::query_as::<_, PaymentTransaction>(
        r#"
        UPDATE payment_transactions
        SET retry_count = retry_count + 1
        WHERE id = $1
          AND status = 'failed'
          AND retry_count < max_retries
        RETURNING *
        "#,
    )
    .bind(payment.id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| {
        // The gate passed on a snapshot; zero rows means the row changed
        // underneath us (another retry took the last slot, or a webhook
        // resolved the payment)
        AppError::ConcurrentTransition(
            "payment is no longer retryable; it changed state concurrently".to_string(),
        )
    })?;

    tracing::info!(
        payment_id = %payment.id,
        attempt = payment.retry_count,
        max_retries = payment.max_retries,
        "retrying payment initiation"
    );

    processor.retry(&payment).await
}

/// Fetch a single payment transaction with its audit trail.
pub async fn find_payment(pool: &DbPool, payment_id: Uuid) -> Result<PaymentTransaction, AppError> {
    sqlx::query_as::<_, PaymentTransaction>("SELECT * FROM payment_transactions WHERE id = $1")
        .bind(payment_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::PaymentNotFound)
}

async fn find_store(pool: &DbPool, store_id: Uuid) -> Result<Store, AppError> {
    sqlx::query_as::<_, Store>("SELECT * FROM stores WHERE id = $1")
        .bind(store_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::StoreNotFound)
}

async fn find_order(pool: &DbPool, order_id: Uuid) -> Result<Order, AppError> {
    sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
        .bind(order_id)
        .fetch_optional(pool)
        .await?
        .ok_or(AppError::OrderNotFound)
}

/// Gate a retry request against the stored transaction.
///
/// Retries are the one deliberate exception to the forward-only state
/// machine: a `failed` aggregator transaction may be re-driven through
/// the quote and push phases. Gateway transactions (identified by a
/// stored access code) are never retried here; the customer simply
/// follows the checkout redirect again.
pub fn ensure_retryable(payment: &PaymentTransaction) -> Result<(), AppError> {
    if payment.status != PaymentStatus::Failed {
        return Err(AppError::RetryNotAllowed(format!(
            "only failed transactions can be retried (status: {:?})",
            payment.status
        )));
    }

    if payment.access_code.is_some() {
        return Err(AppError::RetryNotAllowed(
            "gateway transactions are not retryable; re-open the checkout link".to_string(),
        ));
    }

    if payment.retry_count >= payment.max_retries {
        return Err(AppError::RetriesExhausted);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::str::FromStr;

    fn failed_onramp_payment() -> PaymentTransaction {
        PaymentTransaction {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            order_id: None,
            reference: "JIR_1718034000123_x7Kp2mQa".to_string(),
            access_code: None,
            authorization_url: None,
            quote_id: None,
            onramp_order_id: None,
            amount: Decimal::from_str("250.00").unwrap(),
            currency: "KES".to_string(),
            crypto_amount: None,
            crypto_currency: None,
            exchange_rate: None,
            customer_phone: "+254712345678".to_string(),
            customer_email: None,
            customer_name: None,
            status: PaymentStatus::Failed,
            failure_reason: Some("quote request failed".to_string()),
            retry_count: 0,
            max_retries: 3,
            audit: serde_json::json!([]),
            metadata: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: Some(Utc::now()),
        }
    }

    #[test]
    fn failed_onramp_payment_is_retryable() {
        assert!(ensure_retryable(&failed_onramp_payment()).is_ok());
    }

    #[test]
    fn non_failed_statuses_are_rejected() {
        for status in [
            PaymentStatus::Initialized,
            PaymentStatus::QuoteRequested,
            PaymentStatus::StkInitiated,
            PaymentStatus::Completed,
            PaymentStatus::Cancelled,
        ] {
            let mut payment = failed_onramp_payment();
            payment.status = status;
            assert!(
                matches!(
                    ensure_retryable(&payment),
                    Err(AppError::RetryNotAllowed(_))
                ),
                "{:?} must not be retryable",
                status
            );
        }
    }

    #[test]
    fn gateway_payments_are_never_retryable() {
        let mut payment = failed_onramp_payment();
        payment.access_code = Some("ac_19x2b".to_string());
        assert!(matches!(
            ensure_retryable(&payment),
            Err(AppError::RetryNotAllowed(_))
        ));
    }

    #[test]
    fn exhausted_retries_are_rejected() {
        let mut payment = failed_onramp_payment();
        payment.retry_count = 3;
        assert!(matches!(
            ensure_retryable(&payment),
            Err(AppError::RetriesExhausted)
        ));
    }

    #[test]
    fn retries_below_the_bound_pass_the_gate() {
        let mut payment = failed_onramp_payment();
        payment.retry_count = 2;
        assert!(ensure_retryable(&payment).is_ok());
    }
}
