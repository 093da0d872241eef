//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables,
//! plus the typed webhook envelopes parsed at the processor boundary.

/// Ledger entry model (append-only balance events)
pub mod ledger;
/// Payment transaction model and status lifecycle
pub mod payment;
/// Store and order collaborator models
pub mod store;
/// Typed processor webhook envelopes and the normalized event
pub mod webhook;
