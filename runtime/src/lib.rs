//! # Purchase Pipeline Runtime
//!
//! Runtime pieces shared by the pipeline services.
//!
//! ## Core Components
//!
//! - **[`ConsumerWorker`]**: the validate → persist → commit loop over an
//!   [`EventLog`](purchase_pipeline_core::event_log::EventLog) subscription
//! - **[`RetryPolicy`]**: bounded exponential backoff
//! - **[`metrics`]**: Prometheus recorder and per-component metric recorders
//!
//! ## Example
//!
//! ```ignore
//! use purchase_pipeline_runtime::{ConsumerWorker, RetryPolicy};
//!
//! let handle = ConsumerWorker::builder()
//!     .event_log(event_log)
//!     .store(store)
//!     .retry_policy(RetryPolicy::default())
//!     .build()?
//!     .spawn();
//!
//! handle.shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Consumer worker state machine
pub mod consumer;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use consumer::{
    ConsumerWorker, ConsumerWorkerBuilder, WorkerError, WorkerHandle, WorkerStopper,
};
pub use retry::{RetryPolicy, retry_with_backoff, retry_with_backoff_if};
