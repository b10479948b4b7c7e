//! Event log abstraction for publishing and consuming purchase events.
//!
//! The [`EventLog`] trait wraps a durable, ordered, partitioned append log
//! (Kafka, Redpanda, or an in-memory double in tests). The producer side only
//! publishes; the consumer side subscribes within a consumer group and commits
//! offsets explicitly.
//!
//! # Delivery Semantics
//!
//! ```text
//!  publish ──► [ p0: e0 e1 e2 ... ]  ──► Subscription::next_delivery()
//!              [ p1: e0 e1 ...    ]            │
//!                                              ▼
//!                                      process (validate, persist)
//!                                              │
//!                                              ▼
//!                                   Subscription::commit(token)
//! ```
//!
//! - **At-least-once**: a delivery whose token was never committed is
//!   delivered again after the group resubscribes.
//! - **Manual commit**: nothing is committed implicitly. Committing a token
//!   moves the group position to just after that token.
//! - **Ordered within partition**: no ordering across partitions.
//!
//! # Dyn Compatibility
//!
//! Methods return `Pin<Box<dyn Future>>` rather than using `async fn` so the
//! traits can be used as `Arc<dyn EventLog>` and `Box<dyn Subscription>`.

use crate::event::PurchaseEvent;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Position of a single delivery within the log.
///
/// Opaque to consumers: it is only handed back to [`Subscription::commit`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OffsetToken {
    /// Topic the delivery came from
    pub topic: String,
    /// Partition within the topic
    pub partition: i32,
    /// Offset within the partition
    pub offset: i64,
}

impl OffsetToken {
    /// Create a new token.
    #[must_use]
    pub fn new(topic: impl Into<String>, partition: i32, offset: i64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            offset,
        }
    }
}

impl fmt::Display for OffsetToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]@{}", self.topic, self.partition, self.offset)
    }
}

/// A raw message pulled from the log.
///
/// The payload is left undecoded: validating it is the consumer's job.
#[derive(Clone, Debug)]
pub struct Delivery {
    /// Raw message value (empty for tombstones)
    pub payload: Vec<u8>,
    /// Message key, if any
    pub key: Option<Vec<u8>>,
    /// Where the message sits in the log
    pub token: OffsetToken,
}

/// Broker acknowledgement of a durable publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishAck {
    /// Topic written to
    pub topic: String,
    /// Partition the event landed on
    pub partition: i32,
    /// Offset assigned by the broker
    pub offset: i64,
}

/// Errors returned by [`EventLog::publish`].
///
/// Any of these means the event was not durably stored and the whole
/// submission can be retried.
#[derive(Error, Debug, Clone)]
pub enum PublishError {
    /// The event could not be encoded
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// The broker rejected the message or could not be reached
    #[error("Publish failed for topic '{topic}': {reason}")]
    Unavailable {
        /// Target topic
        topic: String,
        /// Broker-reported reason
        reason: String,
    },

    /// No acknowledgement arrived in time
    #[error("Publish to topic '{topic}' timed out after {timeout:?}")]
    Timeout {
        /// Target topic
        topic: String,
        /// Configured delivery timeout
        timeout: Duration,
    },
}

/// Errors on the consuming side of the log.
#[derive(Error, Debug, Clone)]
pub enum EventLogError {
    /// Failed to create a client
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to join the consumer group or subscribe to the topic
    #[error("Subscription failed for topic '{topic}': {reason}")]
    SubscriptionFailed {
        /// Topic that could not be subscribed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Broker-level error while receiving
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The group position could not be advanced
    #[error("Commit failed for {token}: {reason}")]
    CommitFailed {
        /// Token that failed to commit
        token: OffsetToken,
        /// The reason for failure
        reason: String,
    },
}

/// A durable, ordered, partitioned append log of purchase events.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: a single instance is shared by all
/// concurrent producer requests.
pub trait EventLog: Send + Sync {
    /// Publish an event and wait for the broker's durability acknowledgement.
    ///
    /// The event is keyed by [`PurchaseEvent::partition_key`].
    ///
    /// # Errors
    ///
    /// Returns a [`PublishError`] if the event was not durably stored. The
    /// implementation does not retry indefinitely; the caller decides.
    fn publish(
        &self,
        event: &PurchaseEvent,
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, PublishError>> + Send + '_>>;

    /// Join the configured consumer group.
    ///
    /// The returned subscription starts just after the group's last committed
    /// offset, or at the earliest retained message for a fresh group.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::ConnectionFailed`] or
    /// [`EventLogError::SubscriptionFailed`] if the group cannot be joined.
    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, EventLogError>> + Send + '_>>;
}

/// An active membership in a consumer group.
///
/// Owned exclusively by one consumer loop; dropping it leaves the group.
pub trait Subscription: Send {
    /// Wait for the next delivery.
    ///
    /// Returns `None` once the subscription has ended and must be replaced
    /// by a fresh [`EventLog::subscribe`] call.
    fn next_delivery(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Delivery, EventLogError>>> + Send + '_>>;

    /// Mark everything up to and including `token` as processed.
    ///
    /// # Errors
    ///
    /// Returns [`EventLogError::CommitFailed`] if the position was not stored.
    fn commit(
        &mut self,
        token: &OffsetToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventLogError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_token_display() {
        let token = OffsetToken::new("purchases.v1", 3, 42);
        assert_eq!(token.to_string(), "purchases.v1[3]@42");
    }

    #[test]
    fn traits_are_dyn_compatible() {
        fn assert_log(_: Option<&dyn EventLog>) {}
        fn assert_subscription(_: Option<Box<dyn Subscription>>) {}
        assert_log(None);
        assert_subscription(None);
    }
}
