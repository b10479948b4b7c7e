//! Consumer worker: validate, persist, then commit.
//!
//! [`ConsumerWorker`] owns the at-least-once consumption loop. It pulls one
//! delivery at a time and moves it through a small state machine:
//!
//! ```text
//!            ┌─────────────────────────────────────────────┐
//!            ▼                                             │
//!        Polling ──► Validating ──ok──► Persisting ──ok──► Committing
//!                        │               │    ▲                ▲
//!                        │             error  │ backoff        │
//!                        │               └────┘                │
//!                        └──────────────invalid────────────────┘
//! ```
//!
//! - A payload that fails validation is logged, counted and committed so a
//!   poison message never blocks the partition.
//! - A persistence failure is retried with [`RetryPolicy`] backoff without
//!   committing. When retries run out the worker stops with
//!   [`WorkerError::PersistenceExhausted`] and the offset stays uncommitted,
//!   so the event is redelivered after a restart.
//! - The next delivery is not pulled until the current one is committed or
//!   abandoned, which keeps processing in partition order.
//!
//! Stopping is honored while polling and during backoff. A message that has
//! been persisted is always committed before the worker exits.
//!
//! # Example
//!
//! ```rust,ignore
//! let handle = ConsumerWorker::builder()
//!     .name("purchase-consumer")
//!     .event_log(event_log)
//!     .store(store)
//!     .retry_policy(RetryPolicy::default())
//!     .build()?
//!     .spawn();
//!
//! // Later
//! handle.stop();
//! handle.join().await?;
//! ```

use crate::metrics::ConsumerMetrics;
use crate::retry::RetryPolicy;
use purchase_pipeline_core::event::validate;
use purchase_pipeline_core::event_log::{Delivery, EventLog, OffsetToken, Subscription};
use purchase_pipeline_core::purchase_store::{
    PersistenceError, PurchaseRecord, PurchaseStore, UpsertOutcome,
};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Reasons the worker stopped on its own.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Storage kept failing for one event; its offset was not committed.
    #[error("Gave up persisting event {event_id} at {token} after {retries} retries: {source}")]
    PersistenceExhausted {
        /// Event that could not be persisted
        event_id: Uuid,
        /// Position left uncommitted
        token: OffsetToken,
        /// Retries made after the first attempt
        retries: u32,
        /// Last storage error
        #[source]
        source: PersistenceError,
    },

    /// The worker task panicked or was aborted
    #[error("Consumer worker task failed: {0}")]
    Panicked(String),

    /// The builder was missing a required component
    #[error("Consumer worker misconfigured: {0}")]
    Misconfigured(&'static str),
}

/// Where the worker is in handling the current delivery.
#[derive(Debug)]
enum WorkerState {
    Polling,
    Validating(Delivery),
    Persisting {
        record: PurchaseRecord,
        token: OffsetToken,
        retries: u32,
    },
    Committing(OffsetToken),
}

/// How a subscription's processing loop ended without error.
enum SubscriptionExit {
    Stopped,
    Ended,
}

/// Sequential consumer of purchase events.
///
/// Built via [`ConsumerWorker::builder`] and run via [`ConsumerWorker::spawn`].
pub struct ConsumerWorker {
    /// Worker name (for logging)
    name: String,
    event_log: Arc<dyn EventLog>,
    store: Arc<dyn PurchaseStore>,
    /// Persistence backoff, also used between resubscribe attempts
    retry_policy: RetryPolicy,
    shutdown: broadcast::Receiver<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConsumerWorker {
    /// Create a builder for configuring a worker.
    #[must_use]
    pub fn builder() -> ConsumerWorkerBuilder {
        ConsumerWorkerBuilder::default()
    }

    /// Spawn the worker as a background task.
    #[must_use]
    pub fn spawn(self) -> WorkerHandle {
        let shutdown = self.shutdown_tx.clone();
        let task = tokio::spawn(self.run());
        WorkerHandle { shutdown, task }
    }

    async fn run(mut self) -> Result<(), WorkerError> {
        info!(worker = %self.name, "Consumer worker started");
        let mut failures: u32 = 0;

        loop {
            let subscribed = tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                result = self.event_log.subscribe() => result,
            };

            match subscribed {
                Ok(subscription) => {
                    failures = 0;
                    info!(worker = %self.name, "Subscribed to event log");
                    match self.consume(subscription).await? {
                        SubscriptionExit::Stopped => break,
                        SubscriptionExit::Ended => {
                            warn!(worker = %self.name, "Subscription ended, resubscribing");
                        },
                    }
                },
                Err(e) => {
                    error!(worker = %self.name, error = %e, "Failed to subscribe to event log");
                },
            }

            let delay = self.retry_policy.delay_for_attempt(failures);
            failures = failures.saturating_add(1);
            tokio::select! {
                biased;
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(delay) => {},
            }
        }

        info!(worker = %self.name, "Consumer worker stopped");
        Ok(())
    }

    /// Drive one subscription until it ends, the worker is stopped, or
    /// persistence is exhausted.
    async fn consume(
        &mut self,
        mut subscription: Box<dyn Subscription>,
    ) -> Result<SubscriptionExit, WorkerError> {
        let mut state = WorkerState::Polling;
        let mut poll_errors: u32 = 0;

        loop {
            state = match state {
                WorkerState::Polling => {
                    let next = tokio::select! {
                        biased;
                        _ = self.shutdown.recv() => return Ok(SubscriptionExit::Stopped),
                        next = subscription.next_delivery() => next,
                    };

                    match next {
                        None => return Ok(SubscriptionExit::Ended),
                        Some(Err(e)) => {
                            let delay = self.retry_policy.jittered_delay_for_attempt(poll_errors);
                            poll_errors = poll_errors.saturating_add(1);
                            warn!(
                                worker = %self.name,
                                error = %e,
                                consecutive = poll_errors,
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                "Error polling event log"
                            );

                            tokio::select! {
                                biased;
                                _ = self.shutdown.recv() => return Ok(SubscriptionExit::Stopped),
                                () = tokio::time::sleep(delay) => {},
                            }
                            WorkerState::Polling
                        },
                        Some(Ok(delivery)) => {
                            poll_errors = 0;
                            ConsumerMetrics::record_received();
                            trace!(
                                worker = %self.name,
                                token = %delivery.token,
                                "Delivery received"
                            );
                            WorkerState::Validating(delivery)
                        },
                    }
                },

                WorkerState::Validating(delivery) => match validate(&delivery.payload) {
                    Ok(event) => WorkerState::Persisting {
                        record: PurchaseRecord::from(event),
                        token: delivery.token,
                        retries: 0,
                    },
                    Err(e) => {
                        warn!(
                            worker = %self.name,
                            token = %delivery.token,
                            reason = %e.reason,
                            raw = %e.raw,
                            "Rejected invalid purchase event"
                        );
                        ConsumerMetrics::record_rejected();
                        WorkerState::Committing(delivery.token)
                    },
                },

                WorkerState::Persisting {
                    record,
                    token,
                    retries,
                } => {
                    let started = Instant::now();
                    match self.store.upsert_idempotent(&record).await {
                        Ok(outcome) => {
                            let replaced = outcome == UpsertOutcome::Replaced;
                            ConsumerMetrics::record_persist(started.elapsed(), replaced);
                            if replaced {
                                info!(
                                    worker = %self.name,
                                    event_id = %record.event_id,
                                    token = %token,
                                    "Duplicate event replaced"
                                );
                            } else {
                                debug!(
                                    worker = %self.name,
                                    event_id = %record.event_id,
                                    user_id = %record.user_id,
                                    token = %token,
                                    "Event persisted"
                                );
                            }
                            WorkerState::Committing(token)
                        },
                        Err(e) => {
                            if !self.retry_policy.allows_retry(retries) {
                                error!(
                                    worker = %self.name,
                                    event_id = %record.event_id,
                                    token = %token,
                                    retries,
                                    error = %e,
                                    "Persistence retries exhausted, leaving offset uncommitted"
                                );
                                ConsumerMetrics::record_exhausted();
                                return Err(WorkerError::PersistenceExhausted {
                                    event_id: record.event_id,
                                    token,
                                    retries,
                                    source: e,
                                });
                            }

                            ConsumerMetrics::record_retry(started.elapsed());
                            let delay = self.retry_policy.jittered_delay_for_attempt(retries);
                            warn!(
                                worker = %self.name,
                                event_id = %record.event_id,
                                token = %token,
                                retry = retries + 1,
                                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                                error = %e,
                                "Persistence failed, retrying"
                            );

                            tokio::select! {
                                biased;
                                _ = self.shutdown.recv() => return Ok(SubscriptionExit::Stopped),
                                () = tokio::time::sleep(delay) => {},
                            }

                            WorkerState::Persisting {
                                record,
                                token,
                                retries: retries + 1,
                            }
                        },
                    }
                },

                WorkerState::Committing(token) => {
                    match subscription.commit(&token).await {
                        Ok(()) => trace!(worker = %self.name, token = %token, "Offset committed"),
                        Err(e) => {
                            // A later commit supersedes this one; redelivery is idempotent.
                            warn!(
                                worker = %self.name,
                                token = %token,
                                error = %e,
                                "Offset commit failed"
                            );
                            ConsumerMetrics::record_commit_error();
                        },
                    }
                    WorkerState::Polling
                },
            };
        }
    }
}

/// Builder for a [`ConsumerWorker`].
#[derive(Default)]
pub struct ConsumerWorkerBuilder {
    name: Option<String>,
    event_log: Option<Arc<dyn EventLog>>,
    store: Option<Arc<dyn PurchaseStore>>,
    retry_policy: Option<RetryPolicy>,
}

impl ConsumerWorkerBuilder {
    /// Set worker name. Default: `purchase-consumer`
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the log to consume from.
    #[must_use]
    pub fn event_log(mut self, event_log: Arc<dyn EventLog>) -> Self {
        self.event_log = Some(event_log);
        self
    }

    /// Set the store to persist into.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn PurchaseStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the persistence retry policy. Default: [`RetryPolicy::default`]
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Build the [`ConsumerWorker`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Misconfigured`] if the event log or store is missing.
    pub fn build(self) -> Result<ConsumerWorker, WorkerError> {
        let (shutdown_tx, shutdown) = broadcast::channel(1);
        Ok(ConsumerWorker {
            name: self.name.unwrap_or_else(|| "purchase-consumer".to_string()),
            event_log: self
                .event_log
                .ok_or(WorkerError::Misconfigured("event_log is required"))?,
            store: self
                .store
                .ok_or(WorkerError::Misconfigured("store is required"))?,
            retry_policy: self.retry_policy.unwrap_or_default(),
            shutdown,
            shutdown_tx,
        })
    }
}

/// Handle to a running [`ConsumerWorker`].
pub struct WorkerHandle {
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<Result<(), WorkerError>>,
}

impl WorkerHandle {
    /// Ask the worker to stop after the in-flight message.
    pub fn stop(&self) {
        // Err only means the worker already exited.
        let _ = self.shutdown.send(());
    }

    /// A cloneable handle that can stop the worker after [`join`](Self::join)
    /// has taken ownership of this one.
    #[must_use]
    pub fn stopper(&self) -> WorkerStopper {
        WorkerStopper {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Whether the worker task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to exit.
    ///
    /// # Errors
    ///
    /// Returns the [`WorkerError`] the worker stopped with, or
    /// [`WorkerError::Panicked`] if the task did not complete normally.
    pub async fn join(self) -> Result<(), WorkerError> {
        self.task
            .await
            .map_err(|e| WorkerError::Panicked(e.to_string()))?
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// # Errors
    ///
    /// As [`join`](Self::join).
    pub async fn shutdown(self) -> Result<(), WorkerError> {
        self.stop();
        self.join().await
    }
}

/// Stops a worker without owning its [`WorkerHandle`].
#[derive(Clone)]
pub struct WorkerStopper {
    shutdown: broadcast::Sender<()>,
}

impl WorkerStopper {
    /// Ask the worker to stop after the in-flight message.
    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }
}
