//! Store and order collaborator models.
//!
//! The storefront application owns these tables; the reconciliation core
//! only reads them for validation and advances them as side effects of a
//! successful reconciliation. The store's running balance is mutated
//! exclusively by the ledger writer, in lockstep with ledger entry
//! creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Represents a store record from the database.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Store {
    pub id: Uuid,

    pub name: String,

    /// Display/settlement currency for this store
    pub currency: String,

    /// Running balance in major currency units.
    ///
    /// Updated only by the ledger writer while holding a FOR UPDATE lock
    /// on this row, in the same database transaction as the corresponding
    /// ledger entry insert.
    pub balance: Decimal,

    pub created_at: DateTime<Utc>,
}

/// Represents an order record from the database.
///
/// Status moves `pending` -> `processing` as a side effect of successful
/// reconciliation, never the reverse.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Order {
    pub id: Uuid,

    pub store_id: Uuid,

    /// "pending" until paid, "processing" once reconciled
    pub status: String,

    pub total: Decimal,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}
