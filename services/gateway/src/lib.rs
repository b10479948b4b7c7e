//! Front-facing purchase service.
//!
//! Accepts purchases over HTTP, publishes them to the event log and
//! acknowledges once the broker has stored them. Reads are not served
//! locally: [`ReadProxy`] forwards them to the ledger service, which owns the
//! persisted purchases.

pub mod config;
pub mod proxy;
pub mod routes;
pub mod service;
pub mod state;

pub use config::Config;
pub use proxy::{ProxyError, ReadProxy};
pub use routes::build_router;
pub use service::{PurchaseService, SubmitError, Submission};
pub use state::GatewayState;
