//! Crypto on-ramp aggregator integration.
//!
//! Initiation is a two-step flow: request a fiat-to-crypto exchange quote,
//! then request an onramp push (an STK-style payment prompt on the
//! customer's phone) settling to a platform wallet. The local record is
//! created first and advanced through `quote_requested` and
//! `stk_initiated` as each remote call succeeds; a failure at either step
//! marks the record `failed` with the remote error verbatim, never leaving
//! it in an ambiguous intermediate state.
//!
//! Every remote call outcome is appended to the processor call log keyed
//! by the aggregator's own quote/order identifiers.
//!
//! Inbound webhooks authenticate by shared-secret equality in the
//! `x-onramp-signature` header (the aggregator's protocol uses a plain
//! secret, not an HMAC); comparison is still constant-time.

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{Config, ProcessorEnvironment};
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{
    ClientHandoff, InitiatePaymentResponse, PaymentStatus, PaymentTransaction,
};
use crate::models::webhook::{EventOutcome, ExternalRef, OnrampEvent, ParsedWebhook, ProcessorEvent};
use crate::processors::{
    InitiationParams, PaymentProcessor, constant_time_eq, log_processor_call, mark_payment_failed,
};
use crate::reference::generate_reference;

/// Request header carrying the aggregator's webhook secret.
const SIGNATURE_HEADER: &str = "x-onramp-signature";

/// Prefix for generated transaction references.
const REFERENCE_PREFIX: &str = "JIR";

/// Timeout for outbound aggregator calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Exchange quote returned by the aggregator.
#[derive(Debug, Deserialize)]
struct Quote {
    id: String,
    #[serde(with = "rust_decimal::serde::float")]
    crypto_amount: Decimal,
    crypto_currency: String,
    #[serde(with = "rust_decimal::serde::float")]
    exchange_rate: Decimal,
}

/// Onramp order created by the push request.
#[derive(Debug, Deserialize)]
struct OnrampOrder {
    order_id: String,
}

/// Aggregator processor client.
pub struct OnrampProcessor {
    pool: DbPool,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    webhook_secret: String,
    settlement_wallet: String,
    environment: ProcessorEnvironment,
}

impl OnrampProcessor {
    /// Build an aggregator client from configuration.
    pub fn new(pool: DbPool, config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            pool,
            client,
            base_url: config.onramp_base_url.trim_end_matches('/').to_string(),
            api_key: config.onramp_api_key.clone(),
            api_secret: config.onramp_api_secret.clone(),
            webhook_secret: config.onramp_webhook_secret.clone(),
            settlement_wallet: config.onramp_settlement_wallet.clone(),
            environment: config.onramp_environment,
        })
    }

    fn environment_str(&self) -> &'static str {
        match self.environment {
            ProcessorEnvironment::Staging => "staging",
            ProcessorEnvironment::Production => "production",
        }
    }

    /// POST a JSON body to an aggregator endpoint and decode the response.
    async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, AppError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("x-api-secret", &self.api_secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Dependency(format!("onramp request failed: {}", e)))?;

        let http_status = response.status();
        if !http_status.is_success() {
            // Preserve whatever the aggregator said, verbatim
            let remote = response.text().await.unwrap_or_default();
            return Err(AppError::Dependency(format!(
                "onramp returned HTTP {}: {}",
                http_status, remote
            )));
        }

        response.json::<T>().await.map_err(|e| {
            AppError::Dependency(format!("onramp returned unreadable response: {}", e))
        })
    }

    async fn request_quote(&self, amount: Decimal, fiat_currency: &str) -> Result<Quote, AppError> {
        self.post(
            "/quotes",
            json!({
                "amount": amount,
                "fiat_currency": fiat_currency,
                "category": "onramp",
                "environment": self.environment_str(),
            }),
        )
        .await
    }

    async fn request_onramp(&self, quote_id: &str, phone: &str) -> Result<OnrampOrder, AppError> {
        self.post(
            "/onramp",
            json!({
                "quote_id": quote_id,
                "phone_number": phone,
                // Platform-side settlement wallet chosen by configuration
                "wallet_address": self.settlement_wallet,
                "environment": self.environment_str(),
            }),
        )
        .await
    }

    /// Run the quote + push sequence for an existing local record,
    /// advancing its status as each remote call succeeds.
    ///
    /// Used by both `initiate` (fresh record, `from_status` is
    /// `initialized`) and `retry` (`from_status` is `failed`).
    ///
    /// Each status write is a compare-and-set against the status this
    /// sequence expects to find. The reconciler may commit a terminal
    /// transition at any point between these writes (a late webhook for a
    /// previous order id, say); a zero-row update means exactly that, and
    /// the sequence abandons rather than overwriting a decided state.
    async fn drive(
        &self,
        payment_id: Uuid,
        from_status: PaymentStatus,
        reference: &str,
        amount: Decimal,
        currency: &str,
        phone: &str,
    ) -> Result<InitiatePaymentResponse, AppError> {
        // Step 1: exchange quote
        let quote = match self.request_quote(amount, currency).await {
            Ok(quote) => quote,
            Err(e) => {
                log_processor_call(
                    &self.pool,
                    Some(payment_id),
                    self.name(),
                    "quote",
                    None,
                    false,
                    json!({"error": e.to_string()}),
                )
                .await;
                mark_payment_failed(&self.pool, payment_id, &e.to_string()).await?;
                return Err(e);
            }
        };

        log_processor_call(
            &self.pool,
            Some(payment_id),
            self.name(),
            "quote",
            Some(&quote.id),
            true,
            json!({
                "crypto_amount": quote.crypto_amount,
                "crypto_currency": quote.crypto_currency,
                "exchange_rate": quote.exchange_rate,
            }),
        )
        .await;

        let updated = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET quote_id = $1,
                crypto_amount = $2,
                crypto_currency = $3,
                exchange_rate = $4,
                status = 'quote_requested',
                failure_reason = NULL
            WHERE id = $5
              AND status = $6
            "#,
        )
        .bind(&quote.id)
        .bind(quote.crypto_amount)
        .bind(&quote.crypto_currency)
        .bind(quote.exchange_rate)
        .bind(payment_id)
        .bind(from_status)
        .execute(&self.pool)
        .await?;
        ensure_step_applied(updated.rows_affected(), payment_id, "quote")?;

        // Step 2: STK push against the quote. A failure here must never
        // strand the record in quote_requested.
        let order = match self.request_onramp(&quote.id, phone).await {
            Ok(order) => order,
            Err(e) => {
                log_processor_call(
                    &self.pool,
                    Some(payment_id),
                    self.name(),
                    "onramp_push",
                    Some(&quote.id),
                    false,
                    json!({"error": e.to_string()}),
                )
                .await;
                mark_payment_failed(&self.pool, payment_id, &e.to_string()).await?;
                return Err(e);
            }
        };

        log_processor_call(
            &self.pool,
            Some(payment_id),
            self.name(),
            "onramp_push",
            Some(&order.order_id),
            true,
            json!({"quote_id": quote.id}),
        )
        .await;

        let updated = sqlx::query(
            r#"
            UPDATE payment_transactions
            SET onramp_order_id = $1,
                status = 'stk_initiated'
            WHERE id = $2
              AND status = 'quote_requested'
            "#,
        )
        .bind(&order.order_id)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;
        ensure_step_applied(updated.rows_affected(), payment_id, "onramp_push")?;

        tracing::info!(
            payment_id = %payment_id,
            onramp_order_id = %order.order_id,
            "onramp STK push initiated"
        );

        Ok(InitiatePaymentResponse {
            payment_id,
            reference: reference.to_string(),
            status: PaymentStatus::StkInitiated,
            handoff: ClientHandoff::StkPush {
                onramp_order_id: order.order_id,
                stk_push_initiated: true,
            },
        })
    }
}

#[async_trait]
impl PaymentProcessor for OnrampProcessor {
    fn name(&self) -> &'static str {
        "onramp"
    }

    /// Initiate an aggregator payment.
    ///
    /// # Process
    ///
    /// 1. Insert the local record first (status `initialized`) so the
    ///    attempt is never lost, whatever the remote calls do
    /// 2. Request the exchange quote, persist it (`quote_requested`)
    /// 3. Request the STK push, persist the order id (`stk_initiated`)
    ///
    /// A failure at step 2 or 3 marks the record `failed` with the remote
    /// error message preserved verbatim.
    async fn initiate(
        &self,
        params: InitiationParams,
    ) -> Result<InitiatePaymentResponse, AppError> {
        let reference = generate_reference(REFERENCE_PREFIX);

        let payment = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            INSERT INTO payment_transactions (
                store_id,
                order_id,
                reference,
                amount,
                currency,
                customer_phone,
                customer_email,
                customer_name,
                metadata,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'initialized')
            RETURNING *
            "#,
        )
        .bind(params.store_id)
        .bind(params.order_id)
        .bind(&reference)
        .bind(params.amount)
        .bind(&params.currency)
        .bind(&params.customer_phone)
        .bind(&params.customer_email)
        .bind(&params.customer_name)
        .bind(&params.metadata)
        .fetch_one(&self.pool)
        .await?;

        self.drive(
            payment.id,
            PaymentStatus::Initialized,
            &reference,
            params.amount,
            &params.currency,
            &params.customer_phone,
        )
        .await
    }

    /// Re-drive the quote + push sequence for a previously failed payment.
    ///
    /// The retry-count bound was already checked and the counter bumped by
    /// the initiation service. The stored amount/currency are immutable;
    /// only fresh quote/order identifiers are written.
    async fn retry(
        &self,
        payment: &PaymentTransaction,
    ) -> Result<InitiatePaymentResponse, AppError> {
        self.drive(
            payment.id,
            PaymentStatus::Failed,
            &payment.reference,
            payment.amount,
            &payment.currency,
            &payment.customer_phone,
        )
        .await
    }

    fn verify_webhook(&self, _raw_body: &[u8], headers: &HeaderMap) -> Result<(), AppError> {
        verify_signature(&self.webhook_secret, headers)
    }

    fn parse_webhook(&self, raw_body: &[u8]) -> Result<ParsedWebhook, AppError> {
        parse_webhook(raw_body)
    }
}

/// Interpret the row count of a compare-and-set status write.
///
/// Zero rows means the payment no longer holds the status this step
/// expected: the reconciler committed a transition between our writes.
/// The committed state wins and the initiation sequence stops.
fn ensure_step_applied(rows_affected: u64, payment_id: Uuid, step: &str) -> Result<(), AppError> {
    if rows_affected == 0 {
        return Err(AppError::ConcurrentTransition(format!(
            "payment {} transitioned during the {} step; initiation abandoned",
            payment_id, step
        )));
    }
    Ok(())
}

/// Verify the shared-secret header.
///
/// The aggregator's protocol sends the configured secret directly rather
/// than an HMAC of the body; a missing or non-matching header rejects the
/// delivery before any parsing.
fn verify_signature(secret: &str, headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    if constant_time_eq(secret.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}

/// Parse a verified aggregator webhook body into the normalized event.
///
/// Only `charge.completed` drives reconciliation; its `data.status` field
/// decides the outcome. Other event types, and unknown charge statuses,
/// are acknowledged without mutation.
fn parse_webhook(raw_body: &[u8]) -> Result<ParsedWebhook, AppError> {
    let raw: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    let event: OnrampEvent = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    if event.event_type != "charge.completed" {
        return Ok(ParsedWebhook::Ignored {
            event_type: event.event_type,
        });
    }

    let outcome = match event.data.status.to_ascii_uppercase().as_str() {
        "SUCCESS" => EventOutcome::Success,
        "FAILED" => EventOutcome::Failed,
        "CANCELLED" => EventOutcome::Cancelled,
        other => {
            return Ok(ParsedWebhook::Ignored {
                event_type: format!("{} ({})", event.event_type, other),
            });
        }
    };

    Ok(ParsedWebhook::Event(ProcessorEvent {
        processor: "onramp",
        event_type: event.event_type,
        external_ref: ExternalRef::OnrampOrderId(event.data.id),
        amount: event.data.amount,
        currency: event.data.currency,
        outcome,
        raw,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const TEST_SECRET: &str = "onramp_shared_secret";

    fn headers_with_secret(secret: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(secret).unwrap());
        headers
    }

    fn completed_body(status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "type": "charge.completed",
            "data": {
                "id": "ord_9f2c1",
                "amount": 1500.0,
                "currency": "KES",
                "status": status,
                "payment_method": {"type": "stk_push"}
            }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_matching_secret() {
        let headers = headers_with_secret(TEST_SECRET);
        assert!(verify_signature(TEST_SECRET, &headers).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let headers = headers_with_secret("not_the_secret");
        let result = verify_signature(TEST_SECRET, &headers);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_missing_header() {
        let result = verify_signature(TEST_SECRET, &HeaderMap::new());
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn parses_successful_charge() {
        let ParsedWebhook::Event(event) = parse_webhook(&completed_body("SUCCESS")).unwrap()
        else {
            panic!("expected a transitioning event");
        };
        assert_eq!(event.outcome, EventOutcome::Success);
        assert_eq!(
            event.external_ref,
            ExternalRef::OnrampOrderId("ord_9f2c1".to_string())
        );
        assert_eq!(event.amount, Decimal::from(1500));
        assert_eq!(event.currency, "KES");
    }

    #[test]
    fn status_casing_is_tolerated() {
        let ParsedWebhook::Event(event) = parse_webhook(&completed_body("cancelled")).unwrap()
        else {
            panic!("expected a transitioning event");
        };
        assert_eq!(event.outcome, EventOutcome::Cancelled);
    }

    #[test]
    fn non_charge_events_are_ignored() {
        let body = serde_json::to_vec(&json!({
            "type": "quote.expired",
            "data": {
                "id": "q_1",
                "amount": 10.0,
                "currency": "KES",
                "status": "EXPIRED"
            }
        }))
        .unwrap();

        let parsed = parse_webhook(&body).unwrap();
        assert!(matches!(
            parsed,
            ParsedWebhook::Ignored { ref event_type } if event_type == "quote.expired"
        ));
    }

    #[test]
    fn unknown_charge_status_is_acknowledged_not_processed() {
        let parsed = parse_webhook(&completed_body("PENDING")).unwrap();
        assert!(matches!(parsed, ParsedWebhook::Ignored { .. }));
    }

    #[test]
    fn malformed_json_is_a_client_error() {
        let result = parse_webhook(b"{\"type\": ");
        assert!(matches!(result, Err(AppError::MalformedPayload(_))));
    }

    #[test]
    fn guarded_step_write_applies_when_the_row_still_matches() {
        assert!(ensure_step_applied(1, Uuid::new_v4(), "quote").is_ok());
    }

    #[test]
    fn concurrent_transition_abandons_the_sequence() {
        // Rows affected is zero when a webhook moved the payment to a
        // terminal state between our status writes
        let result = ensure_step_applied(0, Uuid::new_v4(), "onramp_push");
        assert!(matches!(result, Err(AppError::ConcurrentTransition(_))));
    }
}
