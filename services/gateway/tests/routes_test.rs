//! HTTP tests for the gateway router.
//!
//! The event log is in memory; the ledger upstream is a `wiremock` server.

#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use purchase_gateway::{GatewayState, PurchaseService, ReadProxy, build_router};
use purchase_pipeline_core::event::validate;
use purchase_pipeline_runtime::metrics::install_recorder;
use purchase_pipeline_testing::{InMemoryEventLog, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn server(log: &InMemoryEventLog, upstream: &str) -> TestServer {
    let purchases = Arc::new(PurchaseService::new(
        Arc::new(log.clone()),
        Arc::new(test_clock()),
    ));
    let proxy = ReadProxy::new(upstream, Duration::from_millis(500)).expect("client builds");
    let router = build_router(
        GatewayState::new(purchases, proxy),
        install_recorder().expect("recorder installs"),
    );
    TestServer::new(router).expect("test server starts")
}

#[tokio::test]
async fn buy_publishes_and_returns_accepted() {
    let log = InMemoryEventLog::new();
    let server = server(&log, "http://127.0.0.1:9");

    let response = server
        .post("/buy")
        .json(&json!({ "userId": "u1", "itemId": "i99", "quantity": 2 }))
        .await;

    response.assert_status(StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["status"], "accepted");

    let messages = log.messages();
    assert_eq!(messages.len(), 1);
    let event = validate(&messages[0].payload).unwrap();
    assert_eq!(body["eventId"], event.event_id.to_string());
    assert_eq!(event.user_id, "u1");
    assert_eq!(event.item_id, "i99");
    assert_eq!(event.quantity, 2);
}

#[tokio::test]
async fn buy_rejects_invalid_input_without_publishing() {
    let log = InMemoryEventLog::new();
    let server = server(&log, "http://127.0.0.1:9");

    for body in [
        json!({ "userId": "u1", "itemId": "i1", "quantity": 0 }),
        json!({ "userId": "u1", "itemId": "i1", "quantity": -1 }),
        json!({ "userId": "", "itemId": "i1", "quantity": 1 }),
        json!({ "itemId": "i1", "quantity": 1 }),
        json!({ "userId": "u1", "itemId": "i1", "qty": 2 }),
        json!({ "userId": "u1", "itemId": "i1", "quantity": "two" }),
    ] {
        let response = server.post("/buy").json(&body).await;
        response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
        let error: Value = response.json();
        assert_eq!(error["code"], "VALIDATION_ERROR");
    }

    assert!(log.is_empty());
}

#[tokio::test]
async fn buy_reports_publish_failure_as_server_error() {
    let log = InMemoryEventLog::new();
    log.fail_next_publishes(1);
    let server = server(&log, "http://127.0.0.1:9");

    let response = server
        .post("/buy")
        .json(&json!({ "userId": "u1", "itemId": "i1", "quantity": 1 }))
        .await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let error: Value = response.json();
    assert_eq!(error["code"], "INTERNAL_SERVER_ERROR");
    assert!(log.is_empty());
}

#[tokio::test]
async fn bought_items_are_proxied_verbatim() {
    let upstream = MockServer::start().await;
    let ledger_body = json!({
        "userId": "u1",
        "purchases": [{
            "eventId": "6f1c1f0e-2b7a-4c55-9a43-8d4a0c5f7e21",
            "eventType": "PurchaseCreated",
            "eventVersion": 1,
            "timestamp": "2025-01-01T00:00:00Z",
            "userId": "u1",
            "itemId": "i99",
            "quantity": 2
        }]
    });
    Mock::given(method("GET"))
        .and(path("/purchases"))
        .and(query_param("userId", "u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&ledger_body))
        .expect(1)
        .mount(&upstream)
        .await;

    let log = InMemoryEventLog::new();
    let response = server(&log, &upstream.uri())
        .get("/getAllBoughtItems")
        .add_query_param("userId", "u1")
        .await;

    response.assert_status_ok();
    response.assert_json(&ledger_body);
}

#[tokio::test]
async fn proxied_body_keeps_upstream_key_order_and_formatting() {
    let upstream = MockServer::start().await;
    let raw = r#"{"userId":"u1", "purchases":[{"quantity":1.0,"itemId":"i1"}]}"#;
    Mock::given(method("GET"))
        .and(path("/purchases"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(raw, "application/json"))
        .mount(&upstream)
        .await;

    let log = InMemoryEventLog::new();
    let response = server(&log, &upstream.uri())
        .get("/getAllBoughtItems")
        .add_query_param("userId", "u1")
        .await;

    response.assert_status_ok();
    assert_eq!(response.text(), raw);
    assert_eq!(response.header("content-type"), "application/json");
}

#[tokio::test]
async fn bought_items_require_a_user() {
    let log = InMemoryEventLog::new();
    let server = server(&log, "http://127.0.0.1:9");

    server
        .get("/getAllBoughtItems")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    server
        .get("/getAllBoughtItems")
        .add_query_param("userId", "")
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upstream_error_status_is_bad_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/purchases"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&upstream)
        .await;

    let log = InMemoryEventLog::new();
    let response = server(&log, &upstream.uri())
        .get("/getAllBoughtItems")
        .add_query_param("userId", "u1")
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let error: Value = response.json();
    assert_eq!(error["code"], "BAD_GATEWAY");
}

#[tokio::test]
async fn slow_upstream_is_bad_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/purchases"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "userId": "u1", "purchases": [] }))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&upstream)
        .await;

    let log = InMemoryEventLog::new();
    let response = server(&log, &upstream.uri())
        .get("/getAllBoughtItems")
        .add_query_param("userId", "u1")
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn non_json_upstream_body_is_bad_gateway() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/purchases"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&upstream)
        .await;

    let log = InMemoryEventLog::new();
    let response = server(&log, &upstream.uri())
        .get("/getAllBoughtItems")
        .add_query_param("userId", "u1")
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn health_responds_ok() {
    let log = InMemoryEventLog::new();

    let response = server(&log, "http://127.0.0.1:9").get("/health").await;

    response.assert_status_ok();
    response.assert_json(&json!({ "status": "ok" }));
}

#[tokio::test]
async fn metrics_count_published_purchases() {
    let log = InMemoryEventLog::new();
    let server = server(&log, "http://127.0.0.1:9");

    server
        .post("/buy")
        .json(&json!({ "userId": "u1", "itemId": "i1", "quantity": 1 }))
        .await
        .assert_status(StatusCode::ACCEPTED);

    let metrics = server.get("/metrics").await;
    metrics.assert_status_ok();
    assert!(metrics.text().contains("purchase_producer_published_total"));
}
