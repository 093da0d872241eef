//! Payment processor integrations.
//!
//! Both external processors implement one capability interface,
//! [`PaymentProcessor`], so the transaction initiator and the webhook
//! reconciler stay processor-agnostic. Each implementation owns its wire
//! formats, signature scheme and remote-call orchestration; everything it
//! hands back is already verified, typed and normalized.
//!
//! Processors receive their storage and HTTP dependencies through their
//! constructors - there is no module-level shared client state.

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde_json::Value;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{InitiatePaymentResponse, PaymentTransaction};
use crate::models::webhook::ParsedWebhook;

/// Card/mobile-money gateway (synchronous initialize, HMAC-SHA512 webhooks)
pub mod gateway;
/// Crypto on-ramp aggregator (quote + STK push, secret-equality webhooks)
pub mod onramp;

/// Validated initiation input, assembled by the initiation service after
/// store/order checks.
#[derive(Debug, Clone)]
pub struct InitiationParams {
    pub store_id: Uuid,
    pub order_id: Option<Uuid>,
    /// Amount in major currency units
    pub amount: Decimal,
    pub currency: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub metadata: Option<Value>,
}

/// Capability interface implemented once per integrated processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    /// Short processor name used in logs and audit entries.
    fn name(&self) -> &'static str;

    /// Create the remote charge/transaction and the local payment record.
    ///
    /// Implementations own the persistence interleaving for their flow;
    /// the contract is that a known remote failure never leaves the local
    /// record in an ambiguous non-terminal state.
    async fn initiate(&self, params: InitiationParams)
    -> Result<InitiatePaymentResponse, AppError>;

    /// Re-drive a failed initiation for an existing local record.
    ///
    /// The retry-count bound is enforced by the initiation service before
    /// this is called; processors that have no retryable flow reject.
    async fn retry(
        &self,
        payment: &PaymentTransaction,
    ) -> Result<InitiatePaymentResponse, AppError>;

    /// Verify an inbound webhook against the raw, unparsed body bytes.
    ///
    /// Runs before any parsing; a failure here means the delivery is
    /// rejected with 401 and never reaches business logic.
    fn verify_webhook(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<(), AppError>;

    /// Parse a verified webhook body into the normalized event shape.
    fn parse_webhook(&self, raw_body: &[u8]) -> Result<ParsedWebhook, AppError>;
}

/// Constant-time byte comparison for signature checks.
///
/// Length is compared first; the hash/secret lengths are not themselves
/// secret, only their contents are.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Append one outbound-call outcome to the processor call log.
///
/// The log is a support/debugging aid keyed by the processor's own
/// identifiers; a failure to write it is reported but never fails the
/// payment flow itself.
pub(crate) async fn log_processor_call(
    pool: &DbPool,
    payment_transaction_id: Option<Uuid>,
    processor: &str,
    operation: &str,
    external_ref: Option<&str>,
    success: bool,
    detail: Value,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO processor_logs (
            payment_transaction_id,
            processor,
            operation,
            external_ref,
            success,
            detail
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(payment_transaction_id)
    .bind(processor)
    .bind(operation)
    .bind(external_ref)
    .bind(success)
    .bind(detail)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(
            processor,
            operation,
            "failed to record processor call log: {}",
            e
        );
    }
}

/// Mark a payment transaction failed with the remote error preserved
/// verbatim. Used when an outbound processor call fails mid-initiation.
///
/// Guarded against already-decided transactions: a webhook that committed
/// `completed` or `cancelled` while the outbound call was in flight must
/// not be overwritten by a late failure marker.
pub(crate) async fn mark_payment_failed(
    pool: &DbPool,
    payment_id: Uuid,
    reason: &str,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = 'failed',
            failure_reason = $1,
            failed_at = COALESCE(failed_at, NOW())
        WHERE id = $2
          AND status NOT IN ('completed', 'cancelled')
        "#,
    )
    .bind(reason)
    .bind(payment_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        tracing::warn!(
            payment_id = %payment_id,
            reason,
            "payment already reached a decided state; failure marker skipped"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_time_eq_matches_equal_slices() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn constant_time_eq_rejects_different_contents() {
        assert!(!constant_time_eq(b"secret", b"secreT"));
    }

    #[test]
    fn constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"secret", b"secrets"));
    }
}
