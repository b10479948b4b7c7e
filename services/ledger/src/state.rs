//! Shared state for the ledger's HTTP handlers.

use purchase_pipeline_core::purchase_store::PurchaseStore;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Only the store is shared with the consumer worker.
#[derive(Clone)]
pub struct LedgerState {
    /// Read side of the persisted purchases
    pub store: Arc<dyn PurchaseStore>,
}

impl LedgerState {
    /// Create a new application state.
    #[must_use]
    pub fn new(store: Arc<dyn PurchaseStore>) -> Self {
        Self { store }
    }
}
