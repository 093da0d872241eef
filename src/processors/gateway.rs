//! Card/mobile-money gateway integration.
//!
//! Initiation is a single synchronous call to the gateway's
//! transaction-initialize endpoint; the customer is then redirected to the
//! returned authorization URL. The local payment record is created only
//! after remote initialization succeeds, so a remote failure never leaves
//! an orphaned local row.
//!
//! Inbound webhooks carry an HMAC-SHA512 signature of the raw request
//! body in the `x-gateway-signature` header, computed with the shared
//! webhook secret.

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha512;
use std::time::Duration;

use crate::config::Config;
use crate::currency;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{
    ClientHandoff, InitiatePaymentResponse, PaymentStatus, PaymentTransaction,
};
use crate::models::webhook::{EventOutcome, ExternalRef, GatewayEvent, ParsedWebhook, ProcessorEvent};
use crate::processors::{InitiationParams, PaymentProcessor, constant_time_eq, log_processor_call};
use crate::reference::generate_reference;

type HmacSha512 = Hmac<Sha512>;

/// Request header carrying the gateway's webhook signature.
const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// Prefix for generated transaction references.
const REFERENCE_PREFIX: &str = "JIR";

/// Timeout for outbound gateway calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Gateway's transaction-initialize response envelope.
#[derive(Debug, Deserialize)]
struct InitializeResponse {
    status: bool,
    message: Option<String>,
    data: Option<InitializeData>,
}

#[derive(Debug, Deserialize)]
struct InitializeData {
    access_code: String,
    authorization_url: String,
}

/// Gateway processor client.
pub struct GatewayProcessor {
    pool: DbPool,
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    webhook_secret: String,
    callback_url: String,
}

impl GatewayProcessor {
    /// Build a gateway client from configuration.
    pub fn new(pool: DbPool, config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            pool,
            client,
            base_url: config.gateway_base_url.trim_end_matches('/').to_string(),
            secret_key: config.gateway_secret_key.clone(),
            webhook_secret: config.gateway_webhook_secret.clone(),
            callback_url: config.gateway_callback_url.clone(),
        })
    }

    /// Call the gateway's transaction-initialize endpoint.
    ///
    /// Amount is converted to minor units for the wire. Any transport
    /// error, non-success HTTP status, or `status: false` body becomes a
    /// dependency error carrying the remote message verbatim.
    async fn initialize_remote(
        &self,
        params: &InitiationParams,
        reference: &str,
        email: &str,
    ) -> Result<InitializeData, AppError> {
        let amount_minor = currency::to_minor_units(params.amount, &params.currency)?;

        let body = json!({
            "email": email,
            "amount": amount_minor,
            "currency": params.currency,
            "reference": reference,
            "callback_url": self.callback_url,
            "metadata": params.metadata,
        });

        let response = self
            .client
            .post(format!("{}/transaction/initialize", self.base_url))
            .bearer_auth(&self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Dependency(format!("gateway initialize failed: {}", e)))?;

        let http_status = response.status();
        let envelope: InitializeResponse = response.json().await.map_err(|e| {
            AppError::Dependency(format!("gateway returned unreadable response: {}", e))
        })?;

        if !http_status.is_success() || !envelope.status {
            let message = envelope
                .message
                .unwrap_or_else(|| format!("gateway initialize returned HTTP {}", http_status));
            return Err(AppError::Dependency(message));
        }

        envelope.data.ok_or_else(|| {
            AppError::Dependency("gateway initialize succeeded without data".to_string())
        })
    }
}

#[async_trait]
impl PaymentProcessor for GatewayProcessor {
    fn name(&self) -> &'static str {
        "gateway"
    }

    /// Initiate a gateway payment.
    ///
    /// # Process
    ///
    /// 1. Generate a unique reference
    /// 2. Initialize the remote transaction (minor units, callback URL)
    /// 3. Only on success, insert the local record in `initialized` status
    ///    carrying the access code and authorization URL
    async fn initiate(
        &self,
        params: InitiationParams,
    ) -> Result<InitiatePaymentResponse, AppError> {
        // The gateway requires a customer email for its checkout page
        let email = params.customer_email.clone().ok_or_else(|| {
            AppError::InvalidRequest("customer_email is required for gateway payments".to_string())
        })?;

        let reference = generate_reference(REFERENCE_PREFIX);

        let remote = match self.initialize_remote(&params, &reference, &email).await {
            Ok(data) => data,
            Err(e) => {
                log_processor_call(
                    &self.pool,
                    None,
                    self.name(),
                    "initialize",
                    Some(&reference),
                    false,
                    json!({"error": e.to_string()}),
                )
                .await;
                return Err(e);
            }
        };

        // Remote side exists now; create the local source-of-truth row.
        // The UNIQUE constraint on reference turns a generator collision
        // into a hard error instead of a silent overwrite.
        let payment = sqlx::query_as::<_, PaymentTransaction>(
            r#"
            INSERT INTO payment_transactions (
                store_id,
                order_id,
                reference,
                access_code,
                authorization_url,
                amount,
                currency,
                customer_phone,
                customer_email,
                customer_name,
                metadata,
                status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'initialized')
            RETURNING *
            "#,
        )
        .bind(params.store_id)
        .bind(params.order_id)
        .bind(&reference)
        .bind(&remote.access_code)
        .bind(&remote.authorization_url)
        .bind(params.amount)
        .bind(&params.currency)
        .bind(&params.customer_phone)
        .bind(&email)
        .bind(&params.customer_name)
        .bind(&params.metadata)
        .fetch_one(&self.pool)
        .await?;

        log_processor_call(
            &self.pool,
            Some(payment.id),
            self.name(),
            "initialize",
            Some(&reference),
            true,
            json!({"access_code": remote.access_code}),
        )
        .await;

        tracing::info!(
            payment_id = %payment.id,
            reference = %reference,
            "gateway payment initialized"
        );

        Ok(InitiatePaymentResponse {
            payment_id: payment.id,
            reference,
            status: PaymentStatus::Initialized,
            handoff: ClientHandoff::Redirect {
                access_code: remote.access_code,
                authorization_url: remote.authorization_url,
            },
        })
    }

    /// Gateway payments are completed by customer redirect; a failed one
    /// is re-initiated as a fresh payment, never retried in place.
    async fn retry(
        &self,
        _payment: &PaymentTransaction,
    ) -> Result<InitiatePaymentResponse, AppError> {
        Err(AppError::RetryNotAllowed(
            "gateway payments cannot be retried; initiate a new payment".to_string(),
        ))
    }

    fn verify_webhook(&self, raw_body: &[u8], headers: &HeaderMap) -> Result<(), AppError> {
        verify_signature(&self.webhook_secret, raw_body, headers)
    }

    fn parse_webhook(&self, raw_body: &[u8]) -> Result<ParsedWebhook, AppError> {
        parse_webhook(raw_body)
    }
}

/// Verify the HMAC-SHA512 signature over the raw, unparsed request body.
///
/// Verifying re-serialized JSON would break on formatting differences, so
/// this only ever sees the original bytes. Comparison is constant-time.
fn verify_signature(secret: &str, raw_body: &[u8], headers: &HeaderMap) -> Result<(), AppError> {
    let provided = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    let expected = compute_signature(secret, raw_body);

    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}

/// HMAC-SHA512 of the body, hex-encoded, per the gateway's protocol.
fn compute_signature(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Parse a verified gateway webhook body into the normalized event.
///
/// Only `charge.success` and `charge.failed` drive state transitions;
/// every other event type is recognized and ignored. The gateway reports
/// amounts in minor units, normalized to major units here.
fn parse_webhook(raw_body: &[u8]) -> Result<ParsedWebhook, AppError> {
    let raw: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    let event: GatewayEvent = serde_json::from_value(raw.clone())
        .map_err(|e| AppError::MalformedPayload(e.to_string()))?;

    let outcome = match event.event.as_str() {
        "charge.success" => EventOutcome::Success,
        "charge.failed" => EventOutcome::Failed,
        _ => {
            return Ok(ParsedWebhook::Ignored {
                event_type: event.event,
            });
        }
    };

    Ok(ParsedWebhook::Event(ProcessorEvent {
        processor: "gateway",
        event_type: event.event,
        external_ref: ExternalRef::GatewayReference(event.data.reference),
        amount: currency::from_minor_units(event.data.amount, &event.data.currency),
        currency: event.data.currency,
        outcome,
        raw,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use rust_decimal::Decimal;

    const TEST_SECRET: &str = "whsec_gateway_test";

    fn signed_headers(secret: &str, body: &[u8]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(&compute_signature(secret, body)).unwrap(),
        );
        headers
    }

    fn success_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": "charge.success",
            "data": {
                "reference": "JIR_1718034000123_x7Kp2mQa",
                "amount": 150000,
                "currency": "KES",
                "status": "success"
            }
        }))
        .unwrap()
    }

    #[test]
    fn accepts_correct_signature() {
        let body = success_body();
        let headers = signed_headers(TEST_SECRET, &body);
        assert!(verify_signature(TEST_SECRET, &body, &headers).is_ok());
    }

    #[test]
    fn rejects_altered_body_with_original_signature() {
        let body = success_body();
        let headers = signed_headers(TEST_SECRET, &body);

        let mut tampered = success_body();
        // Flip the amount
        tampered = String::from_utf8(tampered)
            .unwrap()
            .replace("150000", "150001")
            .into_bytes();

        let result = verify_signature(TEST_SECRET, &tampered, &headers);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_wrong_secret() {
        let body = success_body();
        let headers = signed_headers("some_other_secret", &body);
        let result = verify_signature(TEST_SECRET, &body, &headers);
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn rejects_missing_signature_header() {
        let body = success_body();
        let result = verify_signature(TEST_SECRET, &body, &HeaderMap::new());
        assert!(matches!(result, Err(AppError::InvalidSignature)));
    }

    #[test]
    fn parses_charge_success_normalized_to_major_units() {
        let parsed = parse_webhook(&success_body()).unwrap();

        let ParsedWebhook::Event(event) = parsed else {
            panic!("expected a transitioning event");
        };
        assert_eq!(event.outcome, EventOutcome::Success);
        assert_eq!(event.amount, Decimal::new(150000, 2)); // 1500.00
        assert_eq!(event.currency, "KES");
        assert_eq!(
            event.external_ref,
            ExternalRef::GatewayReference("JIR_1718034000123_x7Kp2mQa".to_string())
        );
    }

    #[test]
    fn parses_charge_failed() {
        let body = serde_json::to_vec(&json!({
            "event": "charge.failed",
            "data": {"reference": "JIR_1_a", "amount": 500, "currency": "KES"}
        }))
        .unwrap();

        let ParsedWebhook::Event(event) = parse_webhook(&body).unwrap() else {
            panic!("expected a transitioning event");
        };
        assert_eq!(event.outcome, EventOutcome::Failed);
    }

    #[test]
    fn ignores_unrelated_event_types() {
        let body = serde_json::to_vec(&json!({
            "event": "transfer.success",
            "data": {"reference": "JIR_1_a", "amount": 500, "currency": "KES"}
        }))
        .unwrap();

        let parsed = parse_webhook(&body).unwrap();
        assert!(matches!(
            parsed,
            ParsedWebhook::Ignored { ref event_type } if event_type == "transfer.success"
        ));
    }

    #[test]
    fn malformed_json_is_a_client_error() {
        let result = parse_webhook(b"not json at all");
        assert!(matches!(result, Err(AppError::MalformedPayload(_))));
    }
}
