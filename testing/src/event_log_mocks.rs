//! In-memory event log for fast, deterministic consumer and producer tests.
//!
//! [`InMemoryEventLog`] models a single-partition topic with per-group
//! committed offsets. Subscriptions start just after the group's last commit
//! (or at offset 0), so dropping a subscription without committing and
//! subscribing again redelivers, exactly like a broker.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only

use purchase_pipeline_core::event::PurchaseEvent;
use purchase_pipeline_core::event_log::{
    Delivery, EventLog, EventLogError, OffsetToken, PublishAck, PublishError, Subscription,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Topic name used by the in-memory log.
pub const IN_MEMORY_TOPIC: &str = "purchases.v1";

const DEFAULT_GROUP: &str = "purchase-consumer";

#[derive(Debug, Default)]
struct LogState {
    messages: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    /// Next offset to read, per consumer group
    committed: HashMap<String, i64>,
    commit_history: Vec<OffsetToken>,
    fail_next_publishes: u32,
    fail_next_commits: u32,
    fail_next_polls: u32,
    fail_next_subscribes: u32,
    /// Bumped to end every open subscription
    epoch: u64,
    subscribe_count: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LogState>,
    appended: Notify,
}

/// In-memory [`EventLog`] with failure injection.
///
/// Clones share the same log. [`with_consumer_group`](Self::with_consumer_group)
/// returns a view on the same messages that tracks a different group.
///
/// # Example
///
/// ```
/// use purchase_pipeline_core::event_log::EventLog;
/// use purchase_pipeline_testing::InMemoryEventLog;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let log = InMemoryEventLog::new();
/// log.append_raw(br#"{"qty":2}"#.to_vec());
///
/// let mut subscription = log.subscribe().await?;
/// let delivery = subscription.next_delivery().await.unwrap()?;
/// subscription.commit(&delivery.token).await?;
///
/// assert_eq!(log.committed_position(), Some(1));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryEventLog {
    shared: Arc<Shared>,
    group: String,
}

impl InMemoryEventLog {
    /// Create an empty log consumed by the default group.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
            group: DEFAULT_GROUP.to_string(),
        }
    }

    /// A view on the same messages that consumes as `group`.
    #[must_use]
    pub fn with_consumer_group(&self, group: impl Into<String>) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            group: group.into(),
        }
    }

    fn append(&self, payload: Vec<u8>, key: Option<Vec<u8>>) -> OffsetToken {
        let offset = {
            let mut state = self.shared.state.lock().unwrap();
            state.messages.push((payload, key));
            i64::try_from(state.messages.len() - 1).unwrap()
        };
        self.shared.appended.notify_waiters();
        OffsetToken::new(IN_MEMORY_TOPIC, 0, offset)
    }

    /// Append an arbitrary payload, bypassing serialization.
    ///
    /// Useful for feeding malformed or foreign events to a consumer.
    pub fn append_raw(&self, payload: impl Into<Vec<u8>>) -> OffsetToken {
        self.append(payload.into(), None)
    }

    /// Number of messages in the log.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.state.lock().unwrap().messages.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every message in the log, in offset order.
    #[must_use]
    pub fn messages(&self) -> Vec<Delivery> {
        let state = self.shared.state.lock().unwrap();
        state
            .messages
            .iter()
            .enumerate()
            .map(|(offset, (payload, key))| Delivery {
                payload: payload.clone(),
                key: key.clone(),
                token: OffsetToken::new(IN_MEMORY_TOPIC, 0, i64::try_from(offset).unwrap()),
            })
            .collect()
    }

    /// Next offset this group will read, if it ever committed.
    #[must_use]
    pub fn committed_position(&self) -> Option<i64> {
        self.shared
            .state
            .lock()
            .unwrap()
            .committed
            .get(&self.group)
            .copied()
    }

    /// Every successfully committed token, across all groups, in commit order.
    #[must_use]
    pub fn commit_history(&self) -> Vec<OffsetToken> {
        self.shared.state.lock().unwrap().commit_history.clone()
    }

    /// Number of successful `subscribe` calls so far.
    #[must_use]
    pub fn subscribe_count(&self) -> u64 {
        self.shared.state.lock().unwrap().subscribe_count
    }

    /// Make the next `n` publishes fail with [`PublishError::Unavailable`].
    pub fn fail_next_publishes(&self, n: u32) {
        self.shared.state.lock().unwrap().fail_next_publishes = n;
    }

    /// Make the next `n` commits fail with [`EventLogError::CommitFailed`].
    pub fn fail_next_commits(&self, n: u32) {
        self.shared.state.lock().unwrap().fail_next_commits = n;
    }

    /// Make the next `n` polls return [`EventLogError::TransportError`].
    pub fn fail_next_polls(&self, n: u32) {
        self.shared.state.lock().unwrap().fail_next_polls = n;
        self.shared.appended.notify_waiters();
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_next_subscribes(&self, n: u32) {
        self.shared.state.lock().unwrap().fail_next_subscribes = n;
    }

    /// End every open subscription; their next poll returns `None`.
    pub fn end_subscriptions(&self) {
        self.shared.state.lock().unwrap().epoch += 1;
        self.shared.appended.notify_waiters();
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog for InMemoryEventLog {
    fn publish(
        &self,
        event: &PurchaseEvent,
    ) -> Pin<Box<dyn Future<Output = Result<PublishAck, PublishError>> + Send + '_>> {
        let payload = event.to_payload();
        let key = event.partition_key().as_bytes().to_vec();

        Box::pin(async move {
            {
                let mut state = self.shared.state.lock().unwrap();
                if state.fail_next_publishes > 0 {
                    state.fail_next_publishes -= 1;
                    return Err(PublishError::Unavailable {
                        topic: IN_MEMORY_TOPIC.to_string(),
                        reason: "injected publish failure".to_string(),
                    });
                }
            }

            let payload = payload.map_err(|e| PublishError::Serialization(e.to_string()))?;
            let token = self.append(payload, Some(key));
            Ok(PublishAck {
                topic: token.topic,
                partition: token.partition,
                offset: token.offset,
            })
        })
    }

    fn subscribe(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn Subscription>, EventLogError>> + Send + '_>>
    {
        Box::pin(async move {
            let mut state = self.shared.state.lock().unwrap();
            if state.fail_next_subscribes > 0 {
                state.fail_next_subscribes -= 1;
                return Err(EventLogError::SubscriptionFailed {
                    topic: IN_MEMORY_TOPIC.to_string(),
                    reason: "injected subscribe failure".to_string(),
                });
            }
            state.subscribe_count += 1;

            Ok(Box::new(InMemorySubscription {
                shared: Arc::clone(&self.shared),
                group: self.group.clone(),
                position: state.committed.get(&self.group).copied().unwrap_or(0),
                epoch: state.epoch,
            }) as Box<dyn Subscription>)
        })
    }
}

/// Subscription handed out by [`InMemoryEventLog`].
pub struct InMemorySubscription {
    shared: Arc<Shared>,
    group: String,
    /// Next offset to deliver
    position: i64,
    epoch: u64,
}

impl InMemorySubscription {
    fn poll_state(&mut self) -> Option<Option<Result<Delivery, EventLogError>>> {
        let mut state = self.shared.state.lock().unwrap();
        if state.epoch != self.epoch {
            return Some(None);
        }
        if state.fail_next_polls > 0 {
            state.fail_next_polls -= 1;
            return Some(Some(Err(EventLogError::TransportError(
                "injected transport error".to_string(),
            ))));
        }

        let index = usize::try_from(self.position).unwrap();
        let (payload, key) = state.messages.get(index)?.clone();
        let token = OffsetToken::new(IN_MEMORY_TOPIC, 0, self.position);
        self.position += 1;
        Some(Some(Ok(Delivery {
            payload,
            key,
            token,
        })))
    }
}

impl Subscription for InMemorySubscription {
    fn next_delivery(
        &mut self,
    ) -> Pin<Box<dyn Future<Output = Option<Result<Delivery, EventLogError>>> + Send + '_>> {
        Box::pin(async move {
            let shared = Arc::clone(&self.shared);
            loop {
                let notified = shared.appended.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(next) = self.poll_state() {
                    return next;
                }
                notified.await;
            }
        })
    }

    fn commit(
        &mut self,
        token: &OffsetToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventLogError>> + Send + '_>> {
        let token = token.clone();

        Box::pin(async move {
            let mut state = self.shared.state.lock().unwrap();
            if state.fail_next_commits > 0 {
                state.fail_next_commits -= 1;
                return Err(EventLogError::CommitFailed {
                    token,
                    reason: "injected commit failure".to_string(),
                });
            }

            state.committed.insert(self.group.clone(), token.offset + 1);
            state.commit_history.push(token);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_clock;

    fn event(user: &str) -> PurchaseEvent {
        PurchaseEvent::new(&test_clock(), user, "i1", 1).unwrap()
    }

    #[tokio::test]
    async fn publish_appends_keyed_by_user() {
        let log = InMemoryEventLog::new();
        let ack = log.publish(&event("u7")).await.unwrap();

        assert_eq!(ack.offset, 0);
        assert_eq!(log.messages()[0].key.as_deref(), Some("u7".as_bytes()));
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered() {
        let log = InMemoryEventLog::new();
        log.append_raw(b"a".to_vec());
        log.append_raw(b"b".to_vec());

        {
            let mut sub = log.subscribe().await.unwrap();
            let first = sub.next_delivery().await.unwrap().unwrap();
            sub.commit(&first.token).await.unwrap();
            let _second = sub.next_delivery().await.unwrap().unwrap();
        }

        let mut sub = log.subscribe().await.unwrap();
        let redelivered = sub.next_delivery().await.unwrap().unwrap();
        assert_eq!(redelivered.payload, b"b");
        assert_eq!(redelivered.token.offset, 1);
    }

    #[tokio::test]
    async fn groups_track_positions_independently() {
        let log = InMemoryEventLog::new();
        log.append_raw(b"a".to_vec());

        let mut sub = log.subscribe().await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        sub.commit(&delivery.token).await.unwrap();

        let other = log.with_consumer_group("audit");
        assert_eq!(log.committed_position(), Some(1));
        assert_eq!(other.committed_position(), None);
    }

    #[tokio::test]
    async fn waiting_subscription_wakes_on_append() {
        let log = InMemoryEventLog::new();
        let mut sub = log.subscribe().await.unwrap();

        let writer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            writer.append_raw(b"late".to_vec());
        });

        let delivery = sub.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let log = InMemoryEventLog::new();
        log.fail_next_publishes(1);
        assert!(log.publish(&event("u1")).await.is_err());
        assert!(log.publish(&event("u1")).await.is_ok());

        log.fail_next_commits(1);
        let mut sub = log.subscribe().await.unwrap();
        let delivery = sub.next_delivery().await.unwrap().unwrap();
        assert!(sub.commit(&delivery.token).await.is_err());
        assert!(log.commit_history().is_empty());
        assert!(sub.commit(&delivery.token).await.is_ok());
        assert_eq!(log.commit_history(), vec![delivery.token]);
    }

    #[tokio::test]
    async fn ended_subscription_returns_none() {
        let log = InMemoryEventLog::new();
        let mut sub = log.subscribe().await.unwrap();
        log.end_subscriptions();
        assert!(sub.next_delivery().await.is_none());
    }
}
