//! Ledger entry model.
//!
//! A ledger entry is an immutable record of a balance-affecting event for
//! a store's account. Entries are append-only: they are never updated or
//! deleted, and the `payment_transaction_id` UNIQUE constraint guarantees
//! at most one entry per payment transaction.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Represents a ledger entry record from the database.
///
/// # Invariant
///
/// `balance_after = balance_before + amount` for sale entries, enforced by
/// a CHECK constraint and by the ledger writer computing both values under
/// the same store-row lock.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct LedgerEntry {
    pub id: Uuid,

    /// Store whose balance this entry affects
    pub store_id: Uuid,

    /// Originating payment transaction (unique: one entry per transaction)
    pub payment_transaction_id: Uuid,

    /// Entry type, e.g. "sale"
    pub entry_type: String,

    /// Amount in major currency units
    pub amount: Decimal,

    pub currency: String,

    /// Store balance read under lock immediately before applying this entry
    pub balance_before: Decimal,

    /// Store balance written in the same database transaction
    pub balance_after: Decimal,

    pub description: Option<String>,

    pub metadata: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}
