//! # Purchase Pipeline Testing
//!
//! Testing utilities for the purchase pipeline.
//!
//! This crate provides:
//! - [`InMemoryEventLog`]: single-partition log with per-group offsets
//! - [`InMemoryPurchaseStore`]: `HashMap`-backed store with failure injection
//! - [`FixedClock`]: deterministic time
//! - [`eventually`]: poll a condition until it holds
//!
//! ## Example
//!
//! ```ignore
//! use purchase_pipeline_testing::{InMemoryEventLog, InMemoryPurchaseStore, eventually};
//!
//! #[tokio::test]
//! async fn persists_published_purchase() {
//!     let log = InMemoryEventLog::new();
//!     let store = InMemoryPurchaseStore::new();
//!     let worker = ConsumerWorker::builder()
//!         .event_log(Arc::new(log.clone()))
//!         .store(Arc::new(store.clone()))
//!         .build()?
//!         .spawn();
//!
//!     log.publish(&event).await?;
//!     assert!(eventually(Duration::from_secs(1), || store.len() == 1).await);
//! }
//! ```

use chrono::{DateTime, Utc};
use purchase_pipeline_core::environment::Clock;

/// In-memory event log
pub mod event_log_mocks;

/// In-memory purchase store
pub mod store_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use purchase_pipeline_testing::mocks::FixedClock;
    /// use purchase_pipeline_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice: the timestamp is hardcoded.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    use std::time::Duration;

    /// Poll `condition` every few milliseconds until it returns `true` or
    /// `timeout` elapses. Returns the final result.
    ///
    /// For asserting on effects of background tasks such as the consumer worker.
    pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

// Re-export commonly used items
pub use event_log_mocks::{IN_MEMORY_TOPIC, InMemoryEventLog, InMemorySubscription};
pub use helpers::eventually;
pub use mocks::{FixedClock, test_clock};
pub use store_mocks::InMemoryPurchaseStore;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn eventually_reports_timeout() {
        assert!(eventually(Duration::from_millis(20), || true).await);
        assert!(!eventually(Duration::from_millis(20), || false).await);
    }
}
