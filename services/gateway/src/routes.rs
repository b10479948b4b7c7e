//! HTTP endpoints of the gateway.
//!
//! ```text
//! POST /buy                        {userId, itemId, quantity} -> 202 {status, eventId}
//! GET  /getAllBoughtItems?userId=  -> ledger body verbatim
//! GET  /health
//! GET  /metrics
//! ```

use crate::proxy::ProxyError;
use crate::service::SubmitError;
use crate::state::GatewayState;
use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    body::Bytes,
    http::{StatusCode, header},
    routing::{get, post},
};
use purchase_pipeline_runtime::metrics::PrometheusHandle;
use purchase_pipeline_web::handlers::{health_check, metrics_routes, not_found};
use purchase_pipeline_web::layers::with_http_layers;
use purchase_pipeline_web::{AppError, WebResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of `POST /buy`. Every field is required; unknown fields are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    /// Purchasing user
    pub user_id: String,
    /// Purchased item
    pub item_id: String,
    /// Number of items
    pub quantity: i64,
}

/// Response of `POST /buy`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyResponse {
    /// Always `"accepted"`
    pub status: &'static str,
    /// Identifier of the queued event
    pub event_id: Uuid,
}

/// Query string carrying the user to look up.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    /// Missing and blank are both rejected by the handler
    #[serde(default)]
    pub user_id: String,
}

impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Invalid(e) => Self::validation(e.to_string()),
            SubmitError::Publish(e) => e.into(),
        }
    }
}

impl From<ProxyError> for AppError {
    fn from(err: ProxyError) -> Self {
        Self::bad_gateway("Purchase history is unavailable").with_source(err.into())
    }
}

/// `POST /buy`: queue a purchase.
///
/// # Errors
///
/// 422 for invalid input, 500 if the event was not durably queued.
pub async fn buy(
    State(state): State<GatewayState>,
    body: Result<Json<BuyRequest>, JsonRejection>,
) -> WebResult<(StatusCode, Json<BuyResponse>)> {
    let Json(request) = body?;

    let submission = state
        .purchases
        .submit_purchase(&request.user_id, &request.item_id, request.quantity)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(BuyResponse {
            status: "accepted",
            event_id: submission.event_id,
        }),
    ))
}

/// `GET /getAllBoughtItems?userId=…`: proxy to the ledger.
///
/// # Errors
///
/// 400 without a `userId`, 502 if the ledger cannot answer.
pub async fn get_all_bought_items(
    State(state): State<GatewayState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> WebResult<([(header::HeaderName, &'static str); 1], Bytes)> {
    let Query(query) = query?;
    let user_id = query.user_id.trim();
    if user_id.is_empty() {
        return Err(AppError::bad_request("userId is required"));
    }

    let body = state.proxy.get_purchases_for_user(user_id).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// Build the gateway router with tracing and request-id layers applied.
pub fn build_router(state: GatewayState, metrics: PrometheusHandle) -> Router {
    let router = Router::new()
        .route("/buy", post(buy))
        .route("/getAllBoughtItems", get(get_all_bought_items))
        .route("/health", get(health_check))
        .merge(metrics_routes(metrics))
        .fallback(not_found)
        .with_state(state);

    with_http_layers(router)
}
