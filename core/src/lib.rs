//! # Purchase Pipeline Core
//!
//! Core types and traits for the purchase event pipeline.
//!
//! The pipeline records purchases asynchronously: a producer publishes
//! [`PurchaseEvent`](event::PurchaseEvent)s to a durable log, and a consumer
//! validates them and persists them idempotently for later reads.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   publish    ┌───────────┐  next_delivery  ┌──────────────┐
//! │ Producer │ ───────────► │ EventLog  │ ──────────────► │   Consumer   │
//! └──────────┘              └───────────┘ ◄────────────── │   Worker     │
//!                                              commit     └──────┬───────┘
//!                                                                │ upsert_idempotent
//!                                                                ▼
//!                                                         ┌──────────────┐
//!                                                         │PurchaseStore │
//!                                                         └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`event`]: wire schema and validation
//! - [`event_log`]: publish / subscribe / commit abstraction
//! - [`purchase_store`]: idempotent persistence abstraction
//! - [`environment`]: injected dependencies such as the clock

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod event;
pub mod event_log;
pub mod purchase_store;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use event::{PurchaseEvent, ValidationError, validate};
pub use event_log::{Delivery, EventLog, OffsetToken, PublishAck, Subscription};
pub use purchase_store::{PurchaseRecord, PurchaseStore, UpsertOutcome};

/// Environment module - dependencies injected into services
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use purchase_pipeline_core::environment::{Clock, SystemClock};
    ///
    /// let now = SystemClock.now();
    /// assert!(now.timestamp() > 0);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
