//! Ledger writer - append-only balance events for store accounts.
//!
//! Recording a sale is a classic read-modify-write: read the store's
//! current balance, compute the new one, write both the ledger entry and
//! the balance update. Two concurrent successful reconciliations for the
//! same store would race without serialization, so the store row is locked
//! `FOR UPDATE` and both writes happen in the caller's database
//! transaction - the pre/post balances in the entry are exactly the values
//! read and written under that lock.
//!
//! # Idempotency
//!
//! `ledger_entries.payment_transaction_id` is UNIQUE: a duplicate
//! reconciliation that reaches this point fails loudly on insert instead
//! of double-crediting the balance. The caller maps that unique violation
//! to a duplicate-delivery no-op.

use sqlx::{Postgres, Transaction};

use crate::error::AppError;
use crate::models::ledger::LedgerEntry;
use crate::models::payment::PaymentTransaction;

/// Record a sale for the payment's store inside the given transaction.
///
/// # Process
///
/// 1. Lock the store row and read its balance (`FOR UPDATE`)
/// 2. Compute `balance_after = balance_before + amount`
/// 3. Insert the ledger entry (fails on duplicate per-transaction entry)
/// 4. Update the store's running balance
///
/// All four steps commit or roll back together with the caller's
/// transaction.
pub async fn record_sale(
    tx: &mut Transaction<'_, Postgres>,
    payment: &PaymentTransaction,
) -> Result<LedgerEntry, AppError> {
    // Lock the store row so concurrent sales for the same store serialize
    let balance_before: rust_decimal::Decimal =
        sqlx::query_scalar("SELECT balance FROM stores WHERE id = $1 FOR UPDATE")
            .bind(payment.store_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(AppError::StoreNotFound)?;

    let balance_after = balance_before + payment.amount;

    let entry = sqlx::query_as::<_, LedgerEntry>(
        r#"
        INSERT INTO ledger_entries (
            store_id,
            payment_transaction_id,
            entry_type,
            amount,
            currency,
            balance_before,
            balance_after,
            description,
            metadata
        )
        VALUES ($1, $2, 'sale', $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(payment.store_id)
    .bind(payment.id)
    .bind(payment.amount)
    .bind(&payment.currency)
    .bind(balance_before)
    .bind(balance_after)
    .bind(format!("Sale for payment {}", payment.reference))
    .bind(serde_json::json!({
        "reference": payment.reference,
        "order_id": payment.order_id,
    }))
    .fetch_one(&mut **tx)
    .await?;

    // Balance update in the same transaction, same lock
    sqlx::query("UPDATE stores SET balance = $1 WHERE id = $2")
        .bind(balance_after)
        .bind(payment.store_id)
        .execute(&mut **tx)
        .await?;

    tracing::info!(
        store_id = %payment.store_id,
        payment_id = %payment.id,
        %balance_before,
        %balance_after,
        "ledger entry recorded"
    );

    Ok(entry)
}
