//! Server-side modules for the wardsync reference reconciliation service.

pub mod reconcile;

pub use reconcile::{router, ReconcileState, StoredEntity};
