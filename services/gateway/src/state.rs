//! Shared state for the gateway's HTTP handlers.

use crate::proxy::ReadProxy;
use crate::service::PurchaseService;
use std::sync::Arc;

/// Cloned (cheaply, via `Arc`) into every request.
#[derive(Clone, Debug)]
pub struct GatewayState {
    /// Producer side
    pub purchases: Arc<PurchaseService>,
    /// Read side
    pub proxy: ReadProxy,
}

impl GatewayState {
    /// Create the state from its two collaborators.
    #[must_use]
    pub const fn new(purchases: Arc<PurchaseService>, proxy: ReadProxy) -> Self {
        Self { purchases, proxy }
    }
}
