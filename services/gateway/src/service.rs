//! Producer side: turning a purchase request into a durably queued event.

use purchase_pipeline_core::environment::Clock;
use purchase_pipeline_core::event::{FieldError, PurchaseEvent};
use purchase_pipeline_core::event_log::{EventLog, PublishAck, PublishError};
use purchase_pipeline_runtime::metrics::ProducerMetrics;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Why a submission was not queued.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The request itself is invalid; nothing was published
    #[error("Invalid purchase: {0}")]
    Invalid(#[from] FieldError),

    /// The broker did not acknowledge the event; the caller may retry
    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// A purchase that is durably queued (not yet necessarily persisted).
#[derive(Clone, Debug)]
pub struct Submission {
    /// Identifier minted for the event
    pub event_id: Uuid,
    /// Broker acknowledgement
    pub ack: PublishAck,
}

/// Accepts purchases and publishes them to the event log.
///
/// Shared across concurrent requests behind an `Arc`.
pub struct PurchaseService {
    event_log: Arc<dyn EventLog>,
    clock: Arc<dyn Clock>,
}

impl PurchaseService {
    /// Create a service publishing to `event_log`, stamping events with `clock`.
    #[must_use]
    pub fn new(event_log: Arc<dyn EventLog>, clock: Arc<dyn Clock>) -> Self {
        Self { event_log, clock }
    }

    /// Validate, build and publish a purchase event.
    ///
    /// Identifiers are trimmed before use. Returns once the broker has
    /// acknowledged the event.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Invalid`] for a blank identifier or non-positive quantity
    /// - [`SubmitError::Publish`] if the event was not durably stored
    pub async fn submit_purchase(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> Result<Submission, SubmitError> {
        let event =
            PurchaseEvent::new(self.clock.as_ref(), user_id.trim(), item_id.trim(), quantity)?;

        let started = Instant::now();
        match self.event_log.publish(&event).await {
            Ok(ack) => {
                ProducerMetrics::record_publish(started.elapsed());
                tracing::debug!(
                    event_id = %event.event_id,
                    user_id = %event.user_id,
                    topic = %ack.topic,
                    partition = ack.partition,
                    offset = ack.offset,
                    "Purchase published"
                );
                Ok(Submission {
                    event_id: event.event_id,
                    ack,
                })
            },
            Err(e) => {
                ProducerMetrics::record_publish_error();
                tracing::error!(
                    event_id = %event.event_id,
                    user_id = %event.user_id,
                    error = %e,
                    "Failed to publish purchase"
                );
                Err(e.into())
            },
        }
    }
}

impl std::fmt::Debug for PurchaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurchaseService").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use purchase_pipeline_core::event::validate;
    use purchase_pipeline_testing::{InMemoryEventLog, test_clock};

    fn service(log: &InMemoryEventLog) -> PurchaseService {
        PurchaseService::new(Arc::new(log.clone()), Arc::new(test_clock()))
    }

    #[tokio::test]
    async fn submission_publishes_one_valid_event_keyed_by_user() {
        let log = InMemoryEventLog::new();

        let submission = service(&log).submit_purchase("u1", "i99", 2).await.unwrap();

        let messages = log.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].key.as_deref(), Some(b"u1".as_slice()));

        let event = validate(&messages[0].payload).unwrap();
        assert_eq!(event.event_id, submission.event_id);
        assert_eq!(event.item_id, "i99");
        assert_eq!(event.quantity, 2);
        assert_eq!(event.timestamp, test_clock().now());
        assert_eq!(submission.ack.offset, 0);
    }

    #[tokio::test]
    async fn identifiers_are_trimmed() {
        let log = InMemoryEventLog::new();

        service(&log).submit_purchase("  u1 ", "i1\n", 1).await.unwrap();

        let event = validate(&log.messages()[0].payload).unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.item_id, "i1");
    }

    #[tokio::test]
    async fn each_submission_gets_a_fresh_event_id() {
        let log = InMemoryEventLog::new();
        let service = service(&log);

        let first = service.submit_purchase("u1", "i1", 1).await.unwrap();
        let second = service.submit_purchase("u1", "i1", 1).await.unwrap();

        assert_ne!(first.event_id, second.event_id);
        assert_eq!(log.len(), 2);
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_the_log() {
        let log = InMemoryEventLog::new();
        let service = service(&log);

        let cases = [("u1", "i1", 0), ("u1", "i1", -1), ("", "i1", 1), ("u1", " ", 1)];
        for (user, item, quantity) in cases {
            let result = service.submit_purchase(user, item, quantity).await;
            assert!(matches!(result, Err(SubmitError::Invalid(_))));
        }
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_surfaced() {
        let log = InMemoryEventLog::new();
        log.fail_next_publishes(1);

        let result = service(&log).submit_purchase("u1", "i1", 1).await;

        assert!(matches!(result, Err(SubmitError::Publish(_))));
        assert!(log.is_empty());
    }
}
