//! Integration tests for [`RedpandaEventLog`] against a real Kafka broker.
//!
//! These tests use testcontainers to start Kafka and check:
//! - Publish then consume, with the event keyed by `userId`
//! - Uncommitted deliveries are redelivered to a fresh subscription
//! - Committed deliveries are not redelivered
//!
//! # Running These Tests
//!
//! Marked `#[ignore]` because they need Docker and take tens of seconds to
//! start a broker:
//! ```bash
//! cargo test -p purchase-pipeline-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use purchase_pipeline_core::environment::SystemClock;
use purchase_pipeline_core::event::{PurchaseEvent, validate};
use purchase_pipeline_core::event_log::{Delivery, EventLog, Subscription};
use purchase_pipeline_redpanda::RedpandaEventLog;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

fn event_log(brokers: &str, topic: &str, group: &str) -> RedpandaEventLog {
    RedpandaEventLog::builder()
        .brokers(brokers)
        .topic(topic)
        .consumer_group(group)
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to create event log")
}

const WARMUP_USER: &str = "warmup";

/// Publishes warmup events until the broker accepts one, which also
/// auto-creates the topic.
async fn warm_up(log: &RedpandaEventLog) {
    let warmup = PurchaseEvent::new(&SystemClock, WARMUP_USER, "warmup", 1).expect("valid event");
    for attempt in 1..=60 {
        if log.publish(&warmup).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(attempt != 60, "Kafka never accepted a publish");
    }
}

/// Next delivery that is not a warmup event.
async fn next(subscription: &mut Box<dyn Subscription>) -> (Delivery, PurchaseEvent) {
    loop {
        let delivery = tokio::time::timeout(Duration::from_secs(30), subscription.next_delivery())
            .await
            .expect("Timeout waiting for delivery")
            .expect("Subscription ended")
            .expect("Failed to receive delivery");
        let event = validate(&delivery.payload).expect("payload validates");
        if event.user_id != WARMUP_USER {
            return (delivery, event);
        }
    }
}

#[tokio::test]
#[ignore]
async fn published_event_is_consumed_with_user_key() {
    let (_kafka, brokers) = start_kafka().await;
    let log = event_log(&brokers, "purchases-roundtrip", "roundtrip-group");

    warm_up(&log).await;
    let event = PurchaseEvent::new(&SystemClock, "u1", "i99", 2).expect("valid event");
    let ack = log.publish(&event).await.expect("Failed to publish");
    assert_eq!(ack.topic, "purchases-roundtrip");

    let mut subscription = log.subscribe().await.expect("Failed to subscribe");
    let (delivery, decoded) = next(&mut subscription).await;

    assert_eq!(delivery.key.as_deref(), Some("u1".as_bytes()));
    assert_eq!(delivery.token.offset, ack.offset);
    assert_eq!(decoded, event);
}

#[tokio::test]
#[ignore]
async fn uncommitted_delivery_is_redelivered_after_resubscribe() {
    let (_kafka, brokers) = start_kafka().await;
    let log = event_log(&brokers, "purchases-redelivery", "redelivery-group");

    let first = PurchaseEvent::new(&SystemClock, "u1", "i1", 1).expect("valid event");
    let second = PurchaseEvent::new(&SystemClock, "u1", "i2", 1).expect("valid event");
    warm_up(&log).await;
    log.publish(&first).await.expect("Failed to publish first event");
    log.publish(&second).await.expect("Failed to publish second event");

    {
        let mut subscription = log.subscribe().await.expect("Failed to subscribe");
        let (delivery, decoded) = next(&mut subscription).await;
        assert_eq!(decoded.event_id, first.event_id);
        subscription
            .commit(&delivery.token)
            .await
            .expect("Failed to commit");
        // Second delivery is read but never committed.
        let _ = next(&mut subscription).await;
    }

    let mut subscription = log.subscribe().await.expect("Failed to resubscribe");
    let (_, decoded) = next(&mut subscription).await;
    assert_eq!(decoded.event_id, second.event_id);
}

#[test]
fn builder_reports_configuration() {
    let log = RedpandaEventLog::builder()
        .brokers("localhost:9092")
        .build()
        .expect("Failed to create event log");

    assert_eq!(log.brokers(), "localhost:9092");
    assert_eq!(log.topic(), "purchases.v1");
    assert_eq!(log.consumer_group(), "purchase-consumer");
}
