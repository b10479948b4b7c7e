//! HTTP handlers shared by both services.

pub mod health;

pub use health::{health_check, metrics_routes};

use crate::error::AppError;
use axum::http::Uri;

/// Fallback for unknown routes: a JSON 404 instead of an empty body.
#[allow(clippy::unused_async)]
pub async fn not_found(uri: Uri) -> AppError {
    AppError::not_found(uri.path())
}
