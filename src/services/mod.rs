//! Business logic services.
//!
//! Services contain the reconciliation core separated from HTTP handlers:
//! the transaction initiator, the webhook reconciler state machine, and
//! the ledger writer. They receive their storage and processor
//! dependencies as arguments rather than through shared module state.

pub mod initiation;
pub mod ledger;
pub mod reconciler;
