//! Payment transaction model, status lifecycle and API types.
//!
//! This module defines:
//! - `PaymentTransaction`: database entity, one row per payment attempt
//! - `PaymentStatus`: the reconciliation state machine's states
//! - Request/response types for initiation and retry endpoints
//!
//! # Lifecycle
//!
//! ```text
//! initialized -> quote_requested -> stk_initiated -> completed
//!                                                 -> failed
//!                                                 -> cancelled
//! ```
//!
//! The gateway flow has no quote phase and goes straight from
//! `initialized` to a terminal state. Terminal states admit no further
//! transition; a webhook arriving for an already-terminal transaction is
//! acknowledged without re-mutating anything.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reconciliation state of a payment attempt.
///
/// Stored as text in the `status` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Local record created; remote side initialized (gateway) or not yet
    /// contacted (aggregator).
    Initialized,
    /// Aggregator exchange quote obtained.
    QuoteRequested,
    /// Aggregator STK push sent to the customer's phone.
    StkInitiated,
    /// Payment confirmed by the processor. Terminal.
    Completed,
    /// Payment failed, or reconciliation rejected it. Terminal.
    Failed,
    /// Payment explicitly cancelled by the customer/processor. Terminal.
    Cancelled,
}

impl PaymentStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Forward-only: every non-terminal state may reach any terminal
    /// state (a gateway charge fails straight from `initialized`; an STK
    /// push can be cancelled mid-flight), and the aggregator phases only
    /// advance in order.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            PaymentStatus::Completed | PaymentStatus::Failed | PaymentStatus::Cancelled => true,
            PaymentStatus::QuoteRequested => *self == PaymentStatus::Initialized,
            PaymentStatus::StkInitiated => *self == PaymentStatus::QuoteRequested,
            PaymentStatus::Initialized => false,
        }
    }
}

/// Represents a payment transaction record from the database.
///
/// # Immutability
///
/// `store_id`, `amount`, `currency` and `reference` are written once at
/// initiation and never rewritten. Webhook reconciliation only transitions
/// `status`, stamps a terminal timestamp, and appends to `audit`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PaymentTransaction {
    /// Unique identifier for this payment attempt
    pub id: Uuid,

    /// Store this payment settles to
    pub store_id: Uuid,

    /// Linked order, if one exists yet (POS pre-auth payments may precede
    /// order finalization)
    pub order_id: Option<Uuid>,

    /// Internal reference (`JIR_<millis>_<suffix>`), also the gateway-side
    /// transaction reference. Unique.
    pub reference: String,

    /// Gateway access code returned by transaction initialization
    pub access_code: Option<String>,

    /// Gateway-hosted checkout URL for the customer
    pub authorization_url: Option<String>,

    /// Aggregator exchange quote id
    pub quote_id: Option<String>,

    /// Aggregator onramp order id (the STK push identifier)
    pub onramp_order_id: Option<String>,

    /// Fiat amount in major currency units (never minor units)
    pub amount: Decimal,

    /// Fiat currency code (ISO 4217)
    pub currency: String,

    /// Crypto settlement amount (aggregator flow only)
    pub crypto_amount: Option<Decimal>,

    /// Crypto settlement currency (aggregator flow only)
    pub crypto_currency: Option<String>,

    /// Fiat-to-crypto exchange rate at quote time
    pub exchange_rate: Option<Decimal>,

    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,

    /// Current lifecycle status
    pub status: PaymentStatus,

    /// Reason recorded when reconciliation or initiation marks this failed
    pub failure_reason: Option<String>,

    /// Caller-invoked initiation retries so far
    pub retry_count: i32,

    /// Bound on caller-invoked retries; once reached, further retry
    /// requests are rejected without contacting the processor
    pub max_retries: i32,

    /// Append-only history of webhook deliveries and processing decisions
    pub audit: serde_json::Value,

    /// Caller-supplied metadata from initiation
    pub metadata: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,

    /// Set exactly once, on the successful terminal transition
    pub completed_at: Option<DateTime<Utc>>,

    /// Set exactly once, on a failed/cancelled terminal transition
    pub failed_at: Option<DateTime<Utc>>,
}

/// Request body for initiating a payment (either processor).
///
/// # JSON Example
///
/// ```json
/// {
///   "store_id": "550e8400-e29b-41d4-a716-446655440000",
///   "order_id": "660e8400-e29b-41d4-a716-446655440001",
///   "amount": "1500.00",
///   "currency": "KES",
///   "customer_phone": "+254712345678",
///   "customer_email": "jane@example.com"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct InitiatePaymentRequest {
    pub store_id: Uuid,

    /// Optional order linkage; validated against the store when present
    pub order_id: Option<Uuid>,

    /// Amount in major currency units
    pub amount: Decimal,

    pub currency: String,

    pub customer_phone: String,

    pub customer_email: Option<String>,

    pub customer_name: Option<String>,

    /// Arbitrary caller metadata, stored verbatim
    pub metadata: Option<serde_json::Value>,
}

/// What the caller's UI needs to complete the payment.
///
/// Gateway payments hand off a redirect; aggregator payments report that
/// an STK push is on its way to the customer's phone.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientHandoff {
    /// Redirect the customer to the gateway-hosted checkout page.
    Redirect {
        access_code: String,
        authorization_url: String,
    },
    /// An STK push was sent; the customer confirms on their phone.
    StkPush {
        onramp_order_id: String,
        stk_push_initiated: bool,
    },
}

/// Response returned for initiation and retry operations.
#[derive(Debug, Serialize)]
pub struct InitiatePaymentResponse {
    pub payment_id: Uuid,
    pub reference: String,
    pub status: PaymentStatus,
    #[serde(flatten)]
    pub handoff: ClientHandoff,
}

/// Response for payment lookups, audit trail included.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub id: Uuid,
    pub store_id: Uuid,
    pub order_id: Option<Uuid>,
    pub reference: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub audit: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl From<PaymentTransaction> for PaymentResponse {
    fn from(payment: PaymentTransaction) -> Self {
        Self {
            id: payment.id,
            store_id: payment.store_id,
            order_id: payment.order_id,
            reference: payment.reference,
            amount: payment.amount,
            currency: payment.currency,
            status: payment.status,
            failure_reason: payment.failure_reason,
            retry_count: payment.retry_count,
            max_retries: payment.max_retries,
            audit: payment.audit,
            created_at: payment.created_at,
            completed_at: payment.completed_at,
            failed_at: payment.failed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_admit_no_transition() {
        for terminal in [
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Cancelled,
        ] {
            for next in [
                PaymentStatus::Initialized,
                PaymentStatus::QuoteRequested,
                PaymentStatus::StkInitiated,
                PaymentStatus::Completed,
                PaymentStatus::Failed,
                PaymentStatus::Cancelled,
            ] {
                assert!(
                    !terminal.can_transition_to(next),
                    "{:?} -> {:?} must be rejected",
                    terminal,
                    next
                );
            }
        }
    }

    #[test]
    fn gateway_happy_path_is_permitted() {
        assert!(PaymentStatus::Initialized.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::Initialized.can_transition_to(PaymentStatus::Failed));
    }

    #[test]
    fn aggregator_phases_advance_in_order() {
        assert!(PaymentStatus::Initialized.can_transition_to(PaymentStatus::QuoteRequested));
        assert!(PaymentStatus::QuoteRequested.can_transition_to(PaymentStatus::StkInitiated));
        assert!(PaymentStatus::StkInitiated.can_transition_to(PaymentStatus::Completed));
        assert!(PaymentStatus::StkInitiated.can_transition_to(PaymentStatus::Cancelled));

        // No skipping forward or moving backward through the quote phases
        assert!(!PaymentStatus::Initialized.can_transition_to(PaymentStatus::StkInitiated));
        assert!(!PaymentStatus::StkInitiated.can_transition_to(PaymentStatus::QuoteRequested));
        assert!(!PaymentStatus::QuoteRequested.can_transition_to(PaymentStatus::Initialized));
    }

    #[test]
    fn terminal_flag_matches_lifecycle() {
        assert!(!PaymentStatus::Initialized.is_terminal());
        assert!(!PaymentStatus::QuoteRequested.is_terminal());
        assert!(!PaymentStatus::StkInitiated.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
    }
}
