//! Specific background job implementations.

pub mod grant_expiry;
pub mod index_reconcile;

pub use grant_expiry::GrantExpiryJob;
pub use index_reconcile::IndexReconcileJob;
