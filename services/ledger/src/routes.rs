//! HTTP endpoints of the ledger.

use crate::state::LedgerState;
use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    routing::get,
};
use purchase_pipeline_core::purchase_store::PurchaseRecord;
use purchase_pipeline_runtime::metrics::PrometheusHandle;
use purchase_pipeline_web::handlers::{health_check, metrics_routes, not_found};
use purchase_pipeline_web::layers::with_http_layers;
use purchase_pipeline_web::{AppError, WebResult};
use serde::{Deserialize, Serialize};

/// Query string of `GET /purchases`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasesQuery {
    /// User whose purchases are listed
    #[serde(default)]
    pub user_id: String,
}

/// Response of `GET /purchases`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchasesResponse {
    /// The user that was queried
    pub user_id: String,
    /// Newest first
    pub purchases: Vec<PurchaseRecord>,
}

/// `GET /purchases?userId=…`
///
/// # Errors
///
/// 400 without a `userId`, 503 if storage cannot be read.
pub async fn get_purchases(
    State(state): State<LedgerState>,
    query: Result<Query<PurchasesQuery>, QueryRejection>,
) -> WebResult<Json<PurchasesResponse>> {
    let Query(query) = query?;
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::bad_request("userId is required"));
    }

    let purchases = state.store.query_by_user(user_id).await?;
    tracing::debug!(user_id, count = purchases.len(), "Purchases read");

    Ok(Json(PurchasesResponse {
        user_id: user_id.to_string(),
        purchases,
    }))
}

/// Build the ledger router with tracing and request-id layers applied.
pub fn build_router(state: LedgerState, metrics: PrometheusHandle) -> Router {
    let router = Router::new()
        .route("/purchases", get(get_purchases))
        .route("/health", get(health_check))
        .merge(metrics_routes(metrics))
        .fallback(not_found)
        .with_state(state);

    with_http_layers(router)
}
