//! Health check and metrics endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems.
//! Liveness only: they do NOT check the broker or the database.

use axum::{Json, Router, routing::get};
use purchase_pipeline_runtime::metrics::PrometheusHandle;
use serde_json::{Value, json};

/// Simple health check endpoint (for basic liveness).
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "ok"
/// }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /metrics` rendering the Prometheus text exposition format.
///
/// The returned router is stateless, so it merges into a router with any
/// state type.
pub fn metrics_routes<S>(handle: PrometheusHandle) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use purchase_pipeline_runtime::metrics::{ProducerMetrics, install_recorder};
    use std::time::Duration;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_simple_health_check() {
        let Json(body) = health_check().await;
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn metrics_route_renders_prometheus_text() {
        let handle = install_recorder().unwrap();
        ProducerMetrics::record_publish(Duration::from_millis(1));

        let app: Router = metrics_routes(handle);
        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("purchase_producer_published_total"));
    }
}
