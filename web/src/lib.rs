//! Shared axum plumbing for the purchase pipeline services.
//!
//! Both the gateway and the ledger build their routers from the pieces here:
//!
//! - [`AppError`]: the single error type handlers return, rendered as
//!   `{"code": "...", "message": "..."}`
//! - [`handlers`]: `/health`, `/metrics` and the JSON 404 fallback
//! - [`layers`]: request ids and request tracing
//! - [`server`]: serving with graceful shutdown on Ctrl+C / SIGTERM
//!
//! # Example
//!
//! ```ignore
//! use purchase_pipeline_web::{handlers, layers, server};
//! use axum::{Router, routing::get};
//!
//! let router = Router::new()
//!     .route("/health", get(handlers::health_check))
//!     .merge(handlers::metrics_routes(handle))
//!     .fallback(handlers::not_found);
//! let router = layers::with_http_layers(router);
//!
//! server::serve(listener, router, server::shutdown_signal()).await?;
//! ```

pub mod error;
pub mod handlers;
pub mod layers;
pub mod server;

pub use error::AppError;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
