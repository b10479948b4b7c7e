//! Prometheus metrics for the purchase pipeline.
//!
//! Components record through the `metrics` facade using the recorder structs
//! below. Each service installs the Prometheus recorder once at startup and
//! serves [`PrometheusHandle::render`] from its `/metrics` route.
//!
//! # Example
//!
//! ```rust,no_run
//! use purchase_pipeline_runtime::metrics::{ProducerMetrics, install_recorder};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let handle = install_recorder()?;
//! ProducerMetrics::record_publish(Duration::from_millis(12));
//! println!("{}", handle.render());
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

pub use metrics_exporter_prometheus::PrometheusHandle;

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus recorder and return a handle for rendering.
///
/// Only the first call installs; later calls in the same process return the
/// same handle, so several services (or tests) can share one recorder.
///
/// # Errors
///
/// Returns [`MetricsError`] if the exporter cannot be built or another
/// recorder was installed outside this function.
pub fn install_recorder() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    match builder.install_recorder() {
        Ok(handle) => {
            let handle = HANDLE.get_or_init(|| handle);
            // Descriptions only reach a recorder that is already installed.
            register_metrics();
            tracing::info!("Prometheus metrics recorder installed");
            Ok(handle.clone())
        },
        // Lost a race with a concurrent caller.
        Err(e) => HANDLE
            .get()
            .cloned()
            .ok_or_else(|| MetricsError::Install(e.to_string())),
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Producer
    describe_counter!(
        "purchase_producer_published_total",
        "Purchase events durably published"
    );
    describe_counter!(
        "purchase_producer_publish_errors_total",
        "Purchase events the broker did not acknowledge"
    );
    describe_histogram!(
        "purchase_producer_publish_duration_seconds",
        "Time from publish to broker acknowledgement"
    );

    // Consumer
    describe_counter!(
        "purchase_consumer_events_received_total",
        "Deliveries pulled from the log"
    );
    describe_counter!(
        "purchase_consumer_events_persisted_total",
        "Events written to the purchase store"
    );
    describe_counter!(
        "purchase_consumer_duplicates_total",
        "Writes that replaced an existing record"
    );
    describe_counter!(
        "purchase_consumer_events_rejected_total",
        "Deliveries that failed validation and were skipped"
    );
    describe_counter!(
        "purchase_consumer_persistence_retries_total",
        "Persistence attempts retried after a storage error"
    );
    describe_counter!(
        "purchase_consumer_persistence_exhausted_total",
        "Events abandoned after exhausting persistence retries"
    );
    describe_counter!(
        "purchase_consumer_commit_errors_total",
        "Offset commits that failed"
    );
    describe_histogram!(
        "purchase_consumer_persist_duration_seconds",
        "Time taken by a single persistence attempt"
    );
}

/// Producer-side metrics recorder.
pub struct ProducerMetrics;

impl ProducerMetrics {
    /// Record an acknowledged publish.
    pub fn record_publish(duration: Duration) {
        counter!("purchase_producer_published_total").increment(1);
        histogram!("purchase_producer_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a publish the broker did not acknowledge.
    pub fn record_publish_error() {
        counter!("purchase_producer_publish_errors_total").increment(1);
    }
}

/// Consumer-side metrics recorder.
pub struct ConsumerMetrics;

impl ConsumerMetrics {
    /// Record a delivery pulled from the log.
    pub fn record_received() {
        counter!("purchase_consumer_events_received_total").increment(1);
    }

    /// Record a persistence attempt and its outcome.
    pub fn record_persist(duration: Duration, replaced: bool) {
        histogram!("purchase_consumer_persist_duration_seconds").record(duration.as_secs_f64());
        counter!("purchase_consumer_events_persisted_total").increment(1);
        if replaced {
            counter!("purchase_consumer_duplicates_total").increment(1);
        }
    }

    /// Record a failed persistence attempt that will be retried.
    pub fn record_retry(duration: Duration) {
        histogram!("purchase_consumer_persist_duration_seconds").record(duration.as_secs_f64());
        counter!("purchase_consumer_persistence_retries_total").increment(1);
    }

    /// Record an event abandoned after the last retry.
    pub fn record_exhausted() {
        counter!("purchase_consumer_persistence_exhausted_total").increment(1);
    }

    /// Record a delivery rejected by validation.
    pub fn record_rejected() {
        counter!("purchase_consumer_events_rejected_total").increment(1);
    }

    /// Record a failed offset commit.
    pub fn record_commit_error() {
        counter!("purchase_consumer_commit_errors_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn install_is_idempotent() {
        let first = install_recorder().unwrap();
        let second = install_recorder().unwrap();

        ProducerMetrics::record_publish(Duration::from_millis(5));
        assert!(first.render().contains("purchase_producer_published_total"));
        assert!(second.render().contains("purchase_producer_published_total"));
    }

    #[test]
    fn rendered_output_contains_recorded_counters() {
        let handle = install_recorder().unwrap();

        ProducerMetrics::record_publish(Duration::from_millis(50));
        ConsumerMetrics::record_received();
        ConsumerMetrics::record_persist(Duration::from_millis(3), true);
        ConsumerMetrics::record_rejected();

        let rendered = handle.render();
        assert!(rendered.contains("purchase_producer_published_total"));
        assert!(rendered.contains("purchase_consumer_events_received_total"));
        assert!(rendered.contains("purchase_consumer_duplicates_total"));
        assert!(rendered.contains("purchase_consumer_events_rejected_total"));
        assert!(rendered.contains("purchase_consumer_persist_duration_seconds"));
    }

    #[test]
    fn descriptions_are_rendered_as_help_lines() {
        let handle = install_recorder().unwrap();

        ConsumerMetrics::record_commit_error();

        let rendered = handle.render();
        assert!(rendered.contains(
            "# HELP purchase_consumer_commit_errors_total Offset commits that failed"
        ));
    }
}
