//! Back-office purchase service.
//!
//! Hosts the consumer worker that validates and persists purchase events,
//! and serves the persisted purchases over HTTP.

pub mod app;
pub mod config;
pub mod routes;
pub mod state;

pub use app::{Application, LedgerError};
pub use config::Config;
pub use routes::build_router;
pub use state::LedgerState;
