//! Typed processor webhook envelopes and the normalized event.
//!
//! Processor payloads are dynamic JSON on the wire; they are parsed into
//! these explicit shapes immediately at the boundary, and everything
//! downstream (reconciler, ledger writer) operates on typed fields only.
//!
//! Each processor's `parse_webhook` produces a [`ParsedWebhook`]: either a
//! recognized-but-ignored event type (acknowledged without mutation), or a
//! normalized [`ProcessorEvent`] that can drive a state transition.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::models::payment::PaymentStatus;

// ---------------------------------------------------------------------------
// Gateway (card / mobile money) envelope
// ---------------------------------------------------------------------------

/// Gateway webhook envelope: `{"event": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: GatewayEventData,
}

/// Gateway event payload. Amount arrives in minor units.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEventData {
    /// The reference this system generated at initiation time
    pub reference: String,

    /// Amount in minor units (the gateway's representation)
    pub amount: i64,

    pub currency: String,

    #[serde(default)]
    pub status: Option<String>,

    #[serde(default)]
    pub paid_at: Option<String>,

    #[serde(default)]
    pub channel: Option<String>,

    #[serde(default)]
    pub customer: Option<Value>,

    #[serde(default)]
    pub authorization: Option<Value>,
}

// ---------------------------------------------------------------------------
// Aggregator (crypto on-ramp) envelope
// ---------------------------------------------------------------------------

/// Aggregator webhook envelope: `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct OnrampEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: OnrampEventData,
}

/// Aggregator event payload. Amount arrives in major fiat units.
#[derive(Debug, Clone, Deserialize)]
pub struct OnrampEventData {
    /// The aggregator's onramp order id (matched against our stored one)
    pub id: String,

    /// Fiat amount in major units
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,

    pub currency: String,

    /// "SUCCESS", "FAILED" or "CANCELLED"
    pub status: String,

    #[serde(default)]
    pub reference: Option<String>,

    #[serde(default)]
    pub customer: Option<Value>,

    #[serde(default)]
    pub payment_method: Option<Value>,

    #[serde(default)]
    pub processor_response: Option<Value>,
}

// ---------------------------------------------------------------------------
// Normalized event consumed by the reconciler
// ---------------------------------------------------------------------------

/// Outcome a transitioning webhook reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Success,
    Failed,
    Cancelled,
}

impl EventOutcome {
    /// The terminal status this outcome transitions a transaction into.
    pub fn terminal_status(&self) -> PaymentStatus {
        match self {
            EventOutcome::Success => PaymentStatus::Completed,
            EventOutcome::Failed => PaymentStatus::Failed,
            EventOutcome::Cancelled => PaymentStatus::Cancelled,
        }
    }
}

/// Processor-specific external reference used to match a webhook to a
/// local payment transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalRef {
    /// The gateway echoes back the reference we generated at initiation
    GatewayReference(String),
    /// The aggregator reports its own onramp order id
    OnrampOrderId(String),
}

impl ExternalRef {
    pub fn value(&self) -> &str {
        match self {
            ExternalRef::GatewayReference(r) => r,
            ExternalRef::OnrampOrderId(r) => r,
        }
    }
}

impl std::fmt::Display for ExternalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalRef::GatewayReference(r) => write!(f, "gateway reference {}", r),
            ExternalRef::OnrampOrderId(r) => write!(f, "onramp order {}", r),
        }
    }
}

/// A verified, parsed, normalized webhook event ready for reconciliation.
///
/// Amount is already normalized to major currency units regardless of the
/// processor's wire representation. `raw` carries the full inbound payload
/// for the append-only audit trail.
#[derive(Debug, Clone)]
pub struct ProcessorEvent {
    /// Processor name, e.g. "gateway" or "onramp"
    pub processor: &'static str,

    /// Original event type string from the envelope
    pub event_type: String,

    pub external_ref: ExternalRef,

    /// Amount in major currency units
    pub amount: Decimal,

    pub currency: String,

    pub outcome: EventOutcome,

    /// Full inbound payload, appended verbatim to the audit trail
    pub raw: Value,
}

/// Result of parsing a verified webhook body.
#[derive(Debug, Clone)]
pub enum ParsedWebhook {
    /// Recognized event type that does not drive a state transition;
    /// acknowledged with 200 and no mutation.
    Ignored { event_type: String },

    /// An event that may transition a local transaction.
    Event(ProcessorEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_terminal_status() {
        assert_eq!(
            EventOutcome::Success.terminal_status(),
            PaymentStatus::Completed
        );
        assert_eq!(
            EventOutcome::Failed.terminal_status(),
            PaymentStatus::Failed
        );
        assert_eq!(
            EventOutcome::Cancelled.terminal_status(),
            PaymentStatus::Cancelled
        );
    }

    #[test]
    fn gateway_envelope_parses_from_json() {
        let body = serde_json::json!({
            "event": "charge.success",
            "data": {
                "reference": "JIR_1718034000123_x7Kp2mQa",
                "amount": 150000,
                "currency": "KES",
                "status": "success",
                "channel": "mobile_money",
                "paid_at": "2025-06-10T12:00:00Z",
                "customer": {"email": "jane@example.com"}
            }
        });

        let event: GatewayEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event, "charge.success");
        assert_eq!(event.data.amount, 150000);
        assert_eq!(event.data.reference, "JIR_1718034000123_x7Kp2mQa");
    }

    #[test]
    fn onramp_envelope_parses_from_json() {
        let body = serde_json::json!({
            "type": "charge.completed",
            "data": {
                "id": "ord_9f2c1",
                "amount": 1500.0,
                "currency": "KES",
                "status": "SUCCESS",
                "payment_method": {"type": "stk_push"},
                "processor_response": {"code": "0"}
            }
        });

        let event: OnrampEvent = serde_json::from_value(body).unwrap();
        assert_eq!(event.event_type, "charge.completed");
        assert_eq!(event.data.id, "ord_9f2c1");
        assert_eq!(event.data.amount, Decimal::from(1500));
    }

    #[test]
    fn gateway_envelope_rejects_missing_reference() {
        let body = serde_json::json!({
            "event": "charge.success",
            "data": {"amount": 100, "currency": "KES"}
        });
        assert!(serde_json::from_value::<GatewayEvent>(body).is_err());
    }
}
