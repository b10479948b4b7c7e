//! Redpanda event log implementation for the purchase pipeline.
//!
//! This crate provides a Kafka-compatible implementation of the
//! [`EventLog`] trait from `purchase-pipeline-core`, built on rdkafka. It works
//! against Redpanda, Apache Kafka, AWS MSK, or any broker speaking the Kafka
//! protocol.
//!
//! # Delivery Semantics
//!
//! **Producer**: idempotent (`enable.idempotence=true`) with `acks=all` by
//! default. [`EventLog::publish`] resolves only after the broker's delivery
//! report arrives, so an `Ok` means the event is durably stored. Events are
//! keyed by `userId`: one user's purchases land on one partition and keep
//! their order.
//!
//! **Consumer**: `enable.auto.commit=false`. Offsets are committed only when the
//! caller hands a token back to [`Subscription::commit`], giving at-least-once
//! delivery. A fresh consumer group starts from `earliest` by default.
//!
//! # Example
//!
//! ```no_run
//! use purchase_pipeline_core::environment::SystemClock;
//! use purchase_pipeline_core::event::PurchaseEvent;
//! use purchase_pipeline_core::event_log::EventLog;
//! use purchase_pipeline_redpanda::RedpandaEventLog;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let log = RedpandaEventLog::builder()
//!     .brokers("localhost:9092")
//!     .topic("purchases.v1")
//!     .consumer_group("purchase-consumer")
//!     .build()?;
//!
//! let event = PurchaseEvent::new(&SystemClock, "u1", "i99", 2)?;
//! let ack = log.publish(&event).await?;
//! println!("stored at partition {} offset {}", ack.partition, ack.offset);
//!
//! let mut subscription = log.subscribe().await?;
//! while let Some(delivery) = subscription.next_delivery().await {
//!     let delivery = delivery?;
//!     // ... process ...
//!     subscription.commit(&delivery.token).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use purchase_pipeline_core::event::PurchaseEvent;
use purchase_pipeline_core::event_log::{
    Delivery, EventLog, EventLogError, OffsetToken, PublishAck, PublishError, Subscription,
};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::topic_partition_list::{Offset, TopicPartitionList};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

/// Default topic for purchase events.
pub const DEFAULT_TOPIC: &str = "purchases.v1";

/// Default consumer group for the persisting consumer.
pub const DEFAULT_CONSUMER_GROUP: &str = "purchase-consumer";

/// Redpanda-backed event log.
///
/// Holds one thread-safe producer shared by all publishers, unless built with
/// [`RedpandaEventLogBuilder::consumer_only`]. Each call to
/// [`EventLog::subscribe`] creates a dedicated consumer owned by the returned
/// subscription.
pub struct RedpandaEventLog {
    /// Kafka producer for publishing events; absent on consumer-only logs
    producer: Option<FutureProducer>,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Topic carrying purchase events
    topic: String,
    /// Consumer group joined by subscriptions
    consumer_group: String,
    /// Publish delivery timeout
    timeout: Duration,
    /// Where a group without committed offsets starts
    auto_offset_reset: String,
    /// Consumer session timeout
    session_timeout: Duration,
}

impl RedpandaEventLog {
    /// Create an event log with default settings for the given brokers.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ConnectionFailed`] if the producer cannot be created.
    pub fn new(brokers: &str) -> Result<Self, EventLogError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event log.
    #[must_use]
    pub fn builder() -> RedpandaEventLogBuilder {
        RedpandaEventLogBuilder::default()
    }

    /// Broker addresses this log connects to.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Topic this log publishes to and consumes from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group joined by subscriptions.
    #[must_use]
    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Whether this log holds a producer.
    #[must_use]
    pub const fn can_publish(&self) -> bool {
        self.producer.is_some()
    }
}

/// Builder for configuring a [`RedpandaEventLog`].
///
/// # Example
///
/// ```no_run
/// use purchase_pipeline_redpanda::RedpandaEventLog;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = RedpandaEventLog::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .topic("purchases.v1")
///     .consumer_group("purchase-consumer")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventLogBuilder {
    brokers: Option<String>,
    topic: Option<String>,
    consumer_group: Option<String>,
    producer_acks: Option<String>,
    enable_idempotence: Option<bool>,
    compression: Option<String>,
    timeout: Option<Duration>,
    auto_offset_reset: Option<String>,
    session_timeout: Option<Duration>,
    consumer_only: bool,
}

impl RedpandaEventLogBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the topic. Default: `purchases.v1`
    #[must_use]
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Set the consumer group. Default: `purchase-consumer`
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: `"all"`. Idempotent producers require `"all"`.
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Enable or disable the idempotent producer. Default: enabled
    #[must_use]
    pub const fn enable_idempotence(mut self, enabled: bool) -> Self {
        self.enable_idempotence = Some(enabled);
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set how long a publish may wait for the broker's acknowledgement.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set where a consumer group without committed offsets starts reading:
    /// `"earliest"`, `"latest"` or `"error"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Skip creating the producer. `publish` on the built log fails with
    /// [`PublishError::Unavailable`].
    #[must_use]
    pub const fn consumer_only(mut self) -> Self {
        self.consumer_only = true;
        self
    }

    /// Set the consumer session timeout. Default: 6 seconds
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = Some(timeout);
        self
    }

    /// Build the [`RedpandaEventLog`].
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ConnectionFailed`] if:
    /// - Brokers are not set
    /// - Idempotence is enabled with acks other than `"all"`
    /// - The producer cannot be created
    pub fn build(self) -> Result<RedpandaEventLog, EventLogError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventLogError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let topic = self.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
        let consumer_group = self
            .consumer_group
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());
        let acks = self.producer_acks.unwrap_or_else(|| "all".to_string());
        let idempotence = self.enable_idempotence.unwrap_or(true);
        let compression = self.compression.unwrap_or_else(|| "none".to_string());
        let timeout = self.timeout.unwrap_or(Duration::from_secs(5));

        let producer = if self.consumer_only {
            None
        } else {
            if idempotence && acks != "all" {
                return Err(EventLogError::ConnectionFailed(format!(
                    "Idempotent producer requires acks=all, got acks={acks}"
                )));
            }

            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("message.timeout.ms", timeout.as_millis().to_string())
                .set("acks", &acks)
                .set("enable.idempotence", idempotence.to_string())
                .set("compression.type", &compression)
                .create()
                .map_err(|e| {
                    EventLogError::ConnectionFailed(format!("Failed to create producer: {e}"))
                })?;
            Some(producer)
        };

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            topic = %topic,
            consumer_group = %consumer_group,
            acks = %acks,
            idempotence,
            compression = %compression,
            consumer_only = self.consumer_only,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventLog created"
        );

        Ok(RedpandaEventLog {
            producer,
            brokers,
            topic,
            consumer_group,
            timeout,
            auto_offset_reset,
            session_timeout: self.session_timeout.unwrap_or(Duration::from_secs(6)),
        })
    }
}

fn publish_error(topic: &str, timeout: Duration, error: &KafkaError) -> PublishError {
    match error {
        KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut) => PublishError::Timeout {
            topic: topic.to_string(),
            timeout,
        },
        other => PublishError::Unavailable {
            topic: topic.to_string(),
            reason: other.to_string(),
        },
    }
}

impl EventLog for RedpandaEventLog {
    fn publish(
        &self,
        event: &PurchaseEvent,
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, PublishError>> + Send + '_>> {
        let payload = event.to_payload();
        let key = event.partition_key().to_string();
        let event_id = event.event_id;

        Box::pin(async move {
            let Some(producer) = &self.producer else {
                return Err(PublishError::Unavailable {
                    topic: self.topic.clone(),
                    reason: "event log was built consumer-only".to_string(),
                });
            };
            let payload = payload.map_err(|e| PublishError::Serialization(e.to_string()))?;

            let record = FutureRecord::to(&self.topic).payload(&payload).key(&key);

            match producer.send(record, Timeout::After(self.timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition,
                        offset,
                        event_id = %event_id,
                        "Event published"
                    );
                    Ok(PublishAck {
                        topic: self.topic.clone(),
                        partition,
                        offset,
                    })
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %self.topic,
                        event_id = %event_id,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(publish_error(&self.topic, self.timeout, &kafka_error))
                },
            }
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, EventLogError>> + Send + '_>>
    {
        Box::pin(async move {
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &self.brokers)
                .set("group.id", &self.consumer_group)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", self.session_timeout.as_millis().to_string())
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventLogError::SubscriptionFailed {
                    topic: self.topic.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            consumer
                .subscribe(&[self.topic.as_str()])
                .map_err(|e| EventLogError::SubscriptionFailed {
                    topic: self.topic.clone(),
                    reason: format!("Failed to subscribe: {e}"),
                })?;

            tracing::info!(
                topic = %self.topic,
                consumer_group = %self.consumer_group,
                auto_offset_reset = %self.auto_offset_reset,
                manual_commit = true,
                "Subscribed to topic"
            );

            Ok(Box::new(RedpandaSubscription {
                consumer: Arc::new(consumer),
            }) as Box<dyn Subscription>)
        })
    }
}

/// A consumer group membership backed by an rdkafka [`StreamConsumer`].
///
/// Dropping the subscription closes the consumer and leaves the group.
pub struct RedpandaSubscription {
    consumer: Arc<StreamConsumer>,
}

impl Subscription for RedpandaSubscription {
    fn next_delivery(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Delivery, EventLogError>>> + Send + '_>> {
        Box::pin(async move {
            let delivery = match self.consumer.recv().await {
                Ok(message) => {
                    tracing::trace!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Received message"
                    );
                    Ok(Delivery {
                        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
                        key: message.key().map(<[u8]>::to_vec),
                        token: OffsetToken::new(
                            message.topic(),
                            message.partition(),
                            message.offset(),
                        ),
                    })
                },
                Err(e) => Err(EventLogError::TransportError(format!(
                    "Failed to receive message: {e}"
                ))),
            };
            Some(delivery)
        })
    }

    fn commit(
        &mut self,
        token: &OffsetToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventLogError>> + Send + '_>> {
        let token = token.clone();
        let consumer = Arc::clone(&self.consumer);

        Box::pin(async move {
            let commit_failed = |reason: String| EventLogError::CommitFailed {
                token: token.clone(),
                reason,
            };

            // Kafka stores the offset of the next message to read.
            let mut positions = TopicPartitionList::new();
            positions
                .add_partition_offset(
                    &token.topic,
                    token.partition,
                    Offset::Offset(token.offset + 1),
                )
                .map_err(|e| commit_failed(e.to_string()))?;

            // Synchronous commit blocks on a broker round trip.
            tokio::task::spawn_blocking(move || consumer.commit(&positions, CommitMode::Sync))
                .await
                .map_err(|e| commit_failed(format!("commit task failed: {e}")))?
                .map_err(|e| commit_failed(e.to_string()))?;

            tracing::trace!(token = %token, "Offset committed");
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn redpanda_event_log_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaEventLog>();
        assert_sync::<RedpandaEventLog>();
        assert_send::<RedpandaSubscription>();
    }

    #[test]
    fn build_requires_brokers() {
        let result = RedpandaEventLog::builder().topic("purchases.v1").build();
        assert!(matches!(result, Err(EventLogError::ConnectionFailed(_))));
    }

    #[test]
    fn idempotence_requires_acks_all() {
        let result = RedpandaEventLog::builder()
            .brokers("localhost:9092")
            .producer_acks("1")
            .build();
        assert!(
            matches!(result, Err(EventLogError::ConnectionFailed(msg)) if msg.contains("acks=all"))
        );
    }

    #[test]
    fn consumer_only_log_has_no_producer() {
        let log = RedpandaEventLog::builder()
            .brokers("localhost:9092")
            .consumer_only()
            .build()
            .unwrap();
        assert!(!log.can_publish());

        let log = RedpandaEventLog::new("localhost:9092").unwrap();
        assert!(log.can_publish());
    }

    #[test]
    fn consumer_only_skips_producer_settings_checks() {
        let result = RedpandaEventLog::builder()
            .brokers("localhost:9092")
            .producer_acks("1")
            .consumer_only()
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn message_timeout_maps_to_publish_timeout() {
        let error = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);
        let mapped = publish_error("purchases.v1", Duration::from_secs(5), &error);
        assert!(matches!(mapped, PublishError::Timeout { .. }));

        let error = KafkaError::MessageProduction(RDKafkaErrorCode::BrokerTransportFailure);
        let mapped = publish_error("purchases.v1", Duration::from_secs(5), &error);
        assert!(matches!(mapped, PublishError::Unavailable { .. }));
    }
}
