//! Webhook reconciler - the state-machine core.
//!
//! Processor webhook delivery is at-least-once; reconciliation must be
//! effectively exactly-once on its side effects. Per inbound delivery:
//!
//! 1. Verify the signature over raw body bytes (never re-serialized JSON)
//! 2. Parse into the processor's typed envelope
//! 3. Acknowledge non-transitioning event types without mutation
//! 4. Match the processor's external reference to a local transaction;
//!    no match is acknowledged too (an error response would make the
//!    processor retry forever for a transaction this system never created)
//! 5. Lock the payment row and re-check: a terminal transaction means a
//!    duplicate delivery, acknowledged without repeating side effects
//! 6. Validate amount/currency/reference consistency; a mismatch
//!    transitions the payment to `failed` with the reason recorded
//! 7. Transition status, stamp the terminal timestamp exactly once, and
//!    append the full payload to the audit trail
//! 8. On success only, run side effects (order advance, ledger entry,
//!    balance update) in a follow-up transaction. A side-effect failure
//!    never rolls back the committed transition - it is flagged for
//!    manual reconciliation instead, and the processor still gets its ack.

use axum::http::HeaderMap;
use chrono::Utc;
use serde_json::json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{PaymentStatus, PaymentTransaction};
use crate::models::webhook::{EventOutcome, ExternalRef, ParsedWebhook, ProcessorEvent};
use crate::processors::PaymentProcessor;
use crate::services::ledger;

/// How a webhook delivery was resolved.
///
/// Every variant except a hard error is acknowledged to the processor
/// with HTTP 200; the distinction exists for logging and the response
/// body, not the status code.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// A state transition was committed.
    Processed {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// Recognized event type that carries no transition.
    Ignored { event_type: String },
    /// No local transaction matches the external reference (orphan).
    NotFound { reference: String },
    /// The transaction was already terminal; duplicate delivery.
    Duplicate {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    /// Amount/currency/reference mismatch; transitioned to failed.
    Mismatch { payment_id: Uuid, reason: String },
}

/// Process one inbound webhook delivery end to end.
pub async fn process_webhook(
    pool: &DbPool,
    processor: &dyn PaymentProcessor,
    headers: &HeaderMap,
    raw_body: &[u8],
) -> Result<WebhookOutcome, AppError> {
    // Steps 1-2: authentication and parsing short-circuit before any
    // business logic; neither can mutate state.
    processor.verify_webhook(raw_body, headers)?;

    let event = match processor.parse_webhook(raw_body)? {
        ParsedWebhook::Ignored { event_type } => {
            tracing::debug!(
                processor = processor.name(),
                event_type,
                "webhook event type not processed"
            );
            return Ok(WebhookOutcome::Ignored { event_type });
        }
        ParsedWebhook::Event(event) => event,
    };

    // Steps 4-7 run under a row lock so near-simultaneous deliveries for
    // the same transaction serialize.
    let mut tx = pool.begin().await?;

    let Some(payment) = find_for_update(&mut tx, &event.external_ref).await? else {
        tx.rollback().await?;
        tracing::warn!(
            processor = processor.name(),
            reference = %event.external_ref,
            "orphan webhook: no matching local transaction"
        );
        return Ok(WebhookOutcome::NotFound {
            reference: event.external_ref.to_string(),
        });
    };

    if payment.status.is_terminal() {
        tx.rollback().await?;
        tracing::info!(
            payment_id = %payment.id,
            status = ?payment.status,
            "duplicate webhook delivery for terminal transaction"
        );
        return Ok(WebhookOutcome::Duplicate {
            payment_id: payment.id,
            status: payment.status,
        });
    }

    if let Err(reason) = validate_consistency(&payment, &event) {
        transition(
            &mut tx,
            &payment,
            PaymentStatus::Failed,
            Some(reason.as_str()),
            &event,
        )
        .await?;
        tx.commit().await?;
        tracing::warn!(
            payment_id = %payment.id,
            reason,
            "webhook rejected: consistency check failed"
        );
        return Ok(WebhookOutcome::Mismatch {
            payment_id: payment.id,
            reason,
        });
    }

    let new_status = event.outcome.terminal_status();
    transition(&mut tx, &payment, new_status, None, &event).await?;
    tx.commit().await?;

    tracing::info!(
        payment_id = %payment.id,
        from = ?payment.status,
        to = ?new_status,
        "payment transitioned"
    );

    // Step 8: side effects. The transition above is already committed and
    // must stay committed whatever happens here.
    if event.outcome == EventOutcome::Success {
        if let Err(e) = apply_success_side_effects(pool, &payment).await {
            if is_duplicate_ledger(&e) {
                tracing::info!(
                    payment_id = %payment.id,
                    "ledger entry already exists; duplicate delivery absorbed"
                );
            } else {
                // Recorded but flagged: the processor believes this
                // payment succeeded, so we do not contradict it. The
                // ledger/order discrepancy needs manual reconciliation.
                tracing::error!(
                    payment_id = %payment.id,
                    error = %e,
                    "side effects failed after committed transition; manual reconciliation required"
                );
            }
        }
    }

    Ok(WebhookOutcome::Processed {
        payment_id: payment.id,
        status: new_status,
    })
}

/// Match a webhook to its local transaction by the processor-specific
/// external reference, locking the row for the rest of the delivery.
async fn find_for_update(
    tx: &mut Transaction<'_, Postgres>,
    external_ref: &ExternalRef,
) -> Result<Option<PaymentTransaction>, AppError> {
    let query = match external_ref {
        ExternalRef::GatewayReference(_) => {
            "SELECT * FROM payment_transactions WHERE reference = $1 FOR UPDATE"
        }
        ExternalRef::OnrampOrderId(_) => {
            "SELECT * FROM payment_transactions WHERE onramp_order_id = $1 FOR UPDATE"
        }
    };

    let payment = sqlx::query_as::<_, PaymentTransaction>(query)
        .bind(external_ref.value())
        .fetch_optional(&mut **tx)
        .await?;

    Ok(payment)
}

/// Validate that the inbound event matches the stored transaction.
///
/// The webhook's amount (already normalized to major units), currency and
/// reference must exactly match what was recorded at initiation. The
/// stored financial fields are immutable; a webhook can never "correct"
/// them, only fail the transaction.
pub fn validate_consistency(
    payment: &PaymentTransaction,
    event: &ProcessorEvent,
) -> Result<(), String> {
    if event.amount != payment.amount {
        return Err(format!(
            "amount mismatch: expected {} {}, webhook reported {} {}",
            payment.amount, payment.currency, event.amount, event.currency
        ));
    }

    if !event.currency.eq_ignore_ascii_case(&payment.currency) {
        return Err(format!(
            "currency mismatch: expected {}, webhook reported {}",
            payment.currency, event.currency
        ));
    }

    let reference_matches = match &event.external_ref {
        ExternalRef::GatewayReference(r) => *r == payment.reference,
        ExternalRef::OnrampOrderId(r) => payment.onramp_order_id.as_deref() == Some(r.as_str()),
    };
    if !reference_matches {
        return Err(format!(
            "reference mismatch: webhook reported {}",
            event.external_ref
        ));
    }

    Ok(())
}

/// Commit a status transition with its audit-trail append.
///
/// Terminal timestamps are stamped at most once; the audit column only
/// ever grows (jsonb array concatenation, never replacement).
async fn transition(
    tx: &mut Transaction<'_, Postgres>,
    payment: &PaymentTransaction,
    new_status: PaymentStatus,
    failure_reason: Option<&str>,
    event: &ProcessorEvent,
) -> Result<(), AppError> {
    debug_assert!(payment.status.can_transition_to(new_status));

    let audit_entry = json!({
        "received_at": Utc::now(),
        "processor": event.processor,
        "event_type": event.event_type,
        "previous_status": payment.status,
        "new_status": new_status,
        "failure_reason": failure_reason,
        "payload": event.raw,
    });

    sqlx::query(
        r#"
        UPDATE payment_transactions
        SET status = $1,
            failure_reason = COALESCE($2, failure_reason),
            completed_at = CASE
                WHEN $1::text = 'completed' AND completed_at IS NULL THEN NOW()
                ELSE completed_at
            END,
            failed_at = CASE
                WHEN $1::text IN ('failed', 'cancelled') AND failed_at IS NULL THEN NOW()
                ELSE failed_at
            END,
            audit = audit || $3::jsonb
        WHERE id = $4
        "#,
    )
    .bind(new_status)
    .bind(failure_reason)
    .bind(audit_entry)
    .bind(payment.id)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Run the success side effects as one unit: advance the linked order,
/// write the ledger entry, bump the store balance.
async fn apply_success_side_effects(
    pool: &DbPool,
    payment: &PaymentTransaction,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    // Order status only ever advances; a paid order is never demoted
    if let Some(order_id) = payment.order_id {
        sqlx::query(
            "UPDATE orders SET status = 'processing', updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
    }

    ledger::record_sale(&mut tx, payment).await?;

    tx.commit().await?;
    Ok(())
}

/// Whether an error is the ledger's per-transaction unique constraint
/// firing, i.e. a duplicate delivery caught at the storage layer.
fn is_duplicate_ledger(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Database(sqlx::Error::Database(db)) if db.is_unique_violation()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::webhook::EventOutcome;
    use chrono::Utc;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn payment_fixture() -> PaymentTransaction {
        PaymentTransaction {
            id: Uuid::new_v4(),
            store_id: Uuid::new_v4(),
            order_id: Some(Uuid::new_v4()),
            reference: "JIR_1718034000123_x7Kp2mQa".to_string(),
            access_code: None,
            authorization_url: None,
            quote_id: Some("q_1".to_string()),
            onramp_order_id: Some("ord_9f2c1".to_string()),
            amount: Decimal::from_str("1000.00").unwrap(),
            currency: "KES".to_string(),
            crypto_amount: None,
            crypto_currency: None,
            exchange_rate: None,
            customer_phone: "+254712345678".to_string(),
            customer_email: Some("jane@example.com".to_string()),
            customer_name: None,
            status: PaymentStatus::StkInitiated,
            failure_reason: None,
            retry_count: 0,
            max_retries: 3,
            audit: serde_json::json!([]),
            metadata: None,
            created_at: Utc::now(),
            completed_at: None,
            failed_at: None,
        }
    }

    fn event_fixture() -> ProcessorEvent {
        ProcessorEvent {
            processor: "onramp",
            event_type: "charge.completed".to_string(),
            external_ref: ExternalRef::OnrampOrderId("ord_9f2c1".to_string()),
            amount: Decimal::from_str("1000.00").unwrap(),
            currency: "KES".to_string(),
            outcome: EventOutcome::Success,
            raw: serde_json::json!({}),
        }
    }

    #[test]
    fn matching_event_passes_consistency_check() {
        assert!(validate_consistency(&payment_fixture(), &event_fixture()).is_ok());
    }

    #[test]
    fn amount_mismatch_is_rejected_with_reason() {
        let mut event = event_fixture();
        event.amount = Decimal::from_str("999.00").unwrap();

        let reason = validate_consistency(&payment_fixture(), &event).unwrap_err();
        assert!(reason.contains("amount mismatch"), "got: {}", reason);
    }

    #[test]
    fn currency_mismatch_is_rejected_with_reason() {
        let mut event = event_fixture();
        event.currency = "NGN".to_string();

        let reason = validate_consistency(&payment_fixture(), &event).unwrap_err();
        assert!(reason.contains("currency mismatch"), "got: {}", reason);
    }

    #[test]
    fn currency_comparison_ignores_case() {
        let mut event = event_fixture();
        event.currency = "kes".to_string();
        assert!(validate_consistency(&payment_fixture(), &event).is_ok());
    }

    #[test]
    fn scale_differences_do_not_fail_amount_equality() {
        // 1000 and 1000.00 are the same money
        let mut event = event_fixture();
        event.amount = Decimal::from(1000);
        assert!(validate_consistency(&payment_fixture(), &event).is_ok());
    }

    #[test]
    fn gateway_reference_must_match_stored_reference() {
        let mut payment = payment_fixture();
        payment.onramp_order_id = None;
        payment.status = PaymentStatus::Initialized;

        let mut event = event_fixture();
        event.external_ref =
            ExternalRef::GatewayReference("JIR_1718034000123_x7Kp2mQa".to_string());
        assert!(validate_consistency(&payment, &event).is_ok());

        event.external_ref = ExternalRef::GatewayReference("JIR_other".to_string());
        let reason = validate_consistency(&payment, &event).unwrap_err();
        assert!(reason.contains("reference mismatch"), "got: {}", reason);
    }

    #[test]
    fn onramp_order_id_must_match_stored_one() {
        let mut event = event_fixture();
        event.external_ref = ExternalRef::OnrampOrderId("ord_other".to_string());

        let reason = validate_consistency(&payment_fixture(), &event).unwrap_err();
        assert!(reason.contains("reference mismatch"), "got: {}", reason);
    }
}
