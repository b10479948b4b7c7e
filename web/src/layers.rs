//! Tower layers applied to every service router.
//!
//! Each request gets an `x-request-id` (kept if the client sent one,
//! otherwise a fresh UUID), a tracing span carrying it, and the same id echoed
//! on the response.

use axum::Router;
use axum::http::Request;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{Level, Span};

/// Header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Wrap `router` with request-id and tracing layers.
pub fn with_http_layers(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &Request<_>| {
                        let request_id = req
                            .headers()
                            .get(REQUEST_ID_HEADER)
                            .and_then(|value| value.to_str().ok())
                            .unwrap_or("-");
                        tracing::span!(
                            Level::INFO,
                            "http",
                            method = %req.method(),
                            uri = %req.uri().path(),
                            request_id = %request_id,
                        )
                    })
                    .on_response(|res: &http::Response<_>, latency: Duration, _span: &Span| {
                        tracing::info!(
                            status = %res.status(),
                            elapsed_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                            "response"
                        );
                    }),
            )
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}
